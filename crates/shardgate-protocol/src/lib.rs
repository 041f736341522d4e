pub mod charset;
pub mod codec;
pub mod error_code;
pub mod messages;

pub use charset::Charset;
pub use messages::{ErrorPacket, OkPacket, RowDataPacket};
