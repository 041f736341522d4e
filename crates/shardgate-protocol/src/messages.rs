use crate::codec::{
    ensure, payload, read_lenenc_bytes, read_lenenc_int, write_header, write_lenenc_bytes,
    write_lenenc_int, HEADER_SIZE, NULL_MARK,
};
use crate::error_code::DEFAULT_SQL_STATE;
use bytes::{Buf, BufMut, BytesMut};
use shardgate_core::ShardgateError;

pub const OK_HEADER: u8 = 0x00;
pub const ERROR_HEADER: u8 = 0xff;
pub const EOF_HEADER: u8 = 0xfe;

pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;

/// First payload byte of a raw packet, used to tell OK/ERR/EOF apart.
pub fn packet_kind(packet: &[u8]) -> Option<u8> {
    packet.get(HEADER_SIZE).copied()
}

/// Success reply to a statement that produces no result set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPacket {
    pub packet_id: u8,
    pub affected_rows: u64,
    pub insert_id: u64,
    pub server_status: u16,
    pub warning_count: u16,
    pub message: Option<Vec<u8>>,
}

impl OkPacket {
    pub fn read(packet: &[u8]) -> Result<Self, ShardgateError> {
        let mut buf = payload(packet)?;
        ensure(buf, 1, "ok packet")?;
        let header = buf.get_u8();
        if header != OK_HEADER && header != EOF_HEADER {
            return Err(ShardgateError::Protocol(format!(
                "expected ok packet, found header 0x{header:02x}"
            )));
        }
        let affected_rows = read_lenenc_int(&mut buf)?;
        let insert_id = read_lenenc_int(&mut buf)?;
        ensure(buf, 4, "ok packet status")?;
        let server_status = buf.get_u16_le();
        let warning_count = buf.get_u16_le();
        let message = if buf.has_remaining() {
            read_lenenc_bytes(&mut buf)?
        } else {
            None
        };
        Ok(Self {
            packet_id: packet[3],
            affected_rows,
            insert_id,
            server_status,
            warning_count,
            message,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        let mut payload = BytesMut::new();
        payload.put_u8(OK_HEADER);
        write_lenenc_int(&mut payload, self.affected_rows);
        write_lenenc_int(&mut payload, self.insert_id);
        payload.put_u16_le(self.server_status);
        payload.put_u16_le(self.warning_count);
        if let Some(message) = &self.message {
            write_lenenc_bytes(&mut payload, message);
        }
        write_header(buf, payload.len(), self.packet_id);
        buf.extend_from_slice(&payload);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPacket {
    pub packet_id: u8,
    pub errno: u16,
    pub sql_state: [u8; 5],
    pub message: Vec<u8>,
}

impl ErrorPacket {
    pub fn new(packet_id: u8, errno: u16, message: Vec<u8>) -> Self {
        Self {
            packet_id,
            errno,
            sql_state: *DEFAULT_SQL_STATE,
            message,
        }
    }

    /// Parses a backend error packet. The `#` SQLSTATE marker is optional on
    /// pre-4.1 servers.
    pub fn read(packet: &[u8]) -> Result<Self, ShardgateError> {
        let mut buf = payload(packet)?;
        ensure(buf, 3, "error packet")?;
        let header = buf.get_u8();
        if header != ERROR_HEADER {
            return Err(ShardgateError::Protocol(format!(
                "expected error packet, found header 0x{header:02x}"
            )));
        }
        let errno = buf.get_u16_le();
        let mut sql_state = *DEFAULT_SQL_STATE;
        if buf.first() == Some(&b'#') && buf.len() >= 6 {
            buf.advance(1);
            buf.copy_to_slice(&mut sql_state);
        }
        Ok(Self {
            packet_id: packet[3],
            errno,
            sql_state,
            message: buf.to_vec(),
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        let payload_len = 1 + 2 + 1 + self.sql_state.len() + self.message.len();
        write_header(buf, payload_len, self.packet_id);
        buf.put_u8(ERROR_HEADER);
        buf.put_u16_le(self.errno);
        buf.put_u8(b'#');
        buf.extend_from_slice(&self.sql_state);
        buf.extend_from_slice(&self.message);
    }

    pub fn message_lossy(&self) -> String {
        String::from_utf8_lossy(&self.message).into_owned()
    }
}

/// One text-protocol result row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowDataPacket {
    pub packet_id: u8,
    pub field_values: Vec<Option<Vec<u8>>>,
}

impl RowDataPacket {
    pub fn new(packet_id: u8) -> Self {
        Self {
            packet_id,
            field_values: Vec::new(),
        }
    }

    pub fn add(&mut self, value: Vec<u8>) {
        self.field_values.push(Some(value));
    }

    pub fn add_null(&mut self) {
        self.field_values.push(None);
    }

    /// Reads up to `field_count` leading fields of a row packet.
    pub fn read(packet: &[u8], field_count: usize) -> Result<Self, ShardgateError> {
        let mut buf = payload(packet)?;
        let mut field_values = Vec::with_capacity(field_count);
        while field_values.len() < field_count && buf.has_remaining() {
            field_values.push(read_lenenc_bytes(&mut buf)?);
        }
        Ok(Self {
            packet_id: packet[3],
            field_values,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        let mut payload = BytesMut::new();
        for value in &self.field_values {
            match value {
                Some(v) => write_lenenc_bytes(&mut payload, v),
                None => payload.put_u8(NULL_MARK),
            }
        }
        write_header(buf, payload.len(), self.packet_id);
        buf.extend_from_slice(&payload);
    }
}

/// Builds a raw EOF packet with the given status flags.
pub fn eof_packet(packet_id: u8, warning_count: u16, server_status: u16) -> BytesMut {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + 5);
    write_header(&mut buf, 5, packet_id);
    buf.put_u8(EOF_HEADER);
    buf.put_u16_le(warning_count);
    buf.put_u16_le(server_status);
    buf
}
