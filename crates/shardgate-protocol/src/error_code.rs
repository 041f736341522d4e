pub const ER_ERROR_ON_CLOSE: u16 = 1023;
pub const ER_NEW_ABORTING_CONNECTION: u16 = 1184;
/// Proxy-local failure while handing a statement to a backend.
pub const ERR_FOUND_EXCEPTION: u16 = 3344;

pub const DEFAULT_SQL_STATE: &[u8; 5] = b"HY000";
