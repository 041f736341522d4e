use bytes::{Buf, BufMut, BytesMut};
use shardgate_core::ShardgateError;

pub const HEADER_SIZE: usize = 4;
pub const NULL_MARK: u8 = 0xfb;
/// Largest payload a single packet can carry. Longer payloads must be split
/// into continuation packets by the caller.
pub const MAX_PAYLOAD: usize = 0x00ff_ffff;

/// Writes a 3-byte little-endian payload length followed by the sequence id.
pub fn write_header(buf: &mut BytesMut, payload_len: usize, packet_id: u8) {
    debug_assert!(
        payload_len <= MAX_PAYLOAD,
        "payload of {payload_len} bytes exceeds a single packet"
    );
    let len = payload_len & MAX_PAYLOAD;
    buf.put_u8((len & 0xff) as u8);
    buf.put_u8(((len >> 8) & 0xff) as u8);
    buf.put_u8(((len >> 16) & 0xff) as u8);
    buf.put_u8(packet_id);
}

/// Appends `payload` wrapped in a packet header.
pub fn write_packet(buf: &mut BytesMut, packet_id: u8, payload: &[u8]) {
    buf.reserve(HEADER_SIZE + payload.len());
    write_header(buf, payload.len(), packet_id);
    buf.extend_from_slice(payload);
}

pub fn packet_id(packet: &[u8]) -> Option<u8> {
    packet.get(3).copied()
}

/// Rewrites the sequence id of a raw packet in place.
pub fn set_packet_id(packet: &mut [u8], packet_id: u8) -> Result<(), ShardgateError> {
    match packet.get_mut(3) {
        Some(slot) => {
            *slot = packet_id;
            Ok(())
        }
        None => Err(ShardgateError::Protocol(format!(
            "packet too short to carry a header: {} bytes",
            packet.len()
        ))),
    }
}

/// Payload of a raw packet, checked against the length in its header.
pub fn payload(packet: &[u8]) -> Result<&[u8], ShardgateError> {
    if packet.len() < HEADER_SIZE {
        return Err(ShardgateError::Protocol(format!(
            "packet too short to carry a header: {} bytes",
            packet.len()
        )));
    }
    let len = packet[0] as usize | (packet[1] as usize) << 8 | (packet[2] as usize) << 16;
    let body = &packet[HEADER_SIZE..];
    if body.len() < len {
        return Err(ShardgateError::Protocol(format!(
            "truncated packet: header says {len} bytes, got {}",
            body.len()
        )));
    }
    Ok(&body[..len])
}

/// Splits a byte stream into whole packets, header included.
pub fn split_packets(mut stream: &[u8]) -> Result<Vec<&[u8]>, ShardgateError> {
    let mut packets = Vec::new();
    while !stream.is_empty() {
        let body = payload(stream)?;
        let (packet, rest) = stream.split_at(HEADER_SIZE + body.len());
        packets.push(packet);
        stream = rest;
    }
    Ok(packets)
}

pub fn write_lenenc_int(buf: &mut BytesMut, value: u64) {
    if value < 251 {
        buf.put_u8(value as u8);
    } else if value < (1 << 16) {
        buf.put_u8(0xfc);
        buf.put_u16_le(value as u16);
    } else if value < (1 << 24) {
        buf.put_u8(0xfd);
        buf.put_u8((value & 0xff) as u8);
        buf.put_u8(((value >> 8) & 0xff) as u8);
        buf.put_u8(((value >> 16) & 0xff) as u8);
    } else {
        buf.put_u8(0xfe);
        buf.put_u64_le(value);
    }
}

pub fn write_lenenc_bytes(buf: &mut BytesMut, value: &[u8]) {
    write_lenenc_int(buf, value.len() as u64);
    buf.extend_from_slice(value);
}

pub fn lenenc_int_size(value: u64) -> usize {
    if value < 251 {
        1
    } else if value < (1 << 16) {
        3
    } else if value < (1 << 24) {
        4
    } else {
        9
    }
}

pub fn read_lenenc_int(buf: &mut &[u8]) -> Result<u64, ShardgateError> {
    ensure(buf, 1, "length-encoded integer")?;
    let first = buf.get_u8();
    match first {
        0xfc => {
            ensure(buf, 2, "length-encoded integer")?;
            Ok(buf.get_u16_le() as u64)
        }
        0xfd => {
            ensure(buf, 3, "length-encoded integer")?;
            let lo = buf.get_u16_le() as u64;
            let hi = buf.get_u8() as u64;
            Ok(lo | hi << 16)
        }
        0xfe => {
            ensure(buf, 8, "length-encoded integer")?;
            Ok(buf.get_u64_le())
        }
        0xff => Err(ShardgateError::Protocol(
            "invalid length-encoded integer marker 0xff".into(),
        )),
        value => Ok(value as u64),
    }
}

/// Reads a length-encoded string; `None` for the SQL NULL marker.
pub fn read_lenenc_bytes(buf: &mut &[u8]) -> Result<Option<Vec<u8>>, ShardgateError> {
    if buf.first() == Some(&NULL_MARK) {
        buf.advance(1);
        return Ok(None);
    }
    let len = read_lenenc_int(buf)? as usize;
    ensure(buf, len, "length-encoded string")?;
    let value = buf[..len].to_vec();
    buf.advance(len);
    Ok(Some(value))
}

pub(crate) fn ensure(buf: &[u8], needed: usize, what: &str) -> Result<(), ShardgateError> {
    if buf.remaining() < needed {
        return Err(ShardgateError::Protocol(format!(
            "truncated {what}: need {needed} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}
