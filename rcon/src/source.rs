//! Source RCON wire format: length-prefixed packets over TCP.
//!
//! `<size i32 LE> <id i32 LE> <type i32 LE> <body bytes> 00 00`, where
//! `size` counts everything after itself. Auth responses reuse the
//! exec-command type value; an id of −1 signals an authentication failure.

use crate::RconError;
use nom::number::complete::le_i32;

pub const RESPONSE_VALUE: i32 = 0;
pub const EXEC_COMMAND: i32 = 2;
pub const AUTH_RESPONSE: i32 = 2;
pub const AUTH: i32 = 3;

/// Sanity cap on the declared packet size; the protocol itself tops out at
/// 4096-byte bodies.
const MAX_PACKET_SIZE: usize = 64 * 1024;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Packet {
    pub id: i32,
    pub ptype: i32,
    pub body: String,
}

pub fn encode(id: i32, ptype: i32, body: &str) -> Vec<u8> {
    let size = 4 + 4 + body.len() + 2;

    let mut out = Vec::with_capacity(4 + size);
    out.extend_from_slice(&(size as i32).to_le_bytes());
    out.extend_from_slice(&id.to_le_bytes());
    out.extend_from_slice(&ptype.to_le_bytes());
    out.extend_from_slice(body.as_bytes());
    out.push(0);
    out.push(0);
    out
}

/// Decodes the first packet in `buf` if it has fully arrived. Returns the
/// packet and the number of bytes consumed, or `None` when more stream
/// data is needed.
pub fn decode(buf: &[u8]) -> Result<Option<(Packet, usize)>, RconError> {
    let Ok((after_size, size)) = le_i32::<_, nom::error::Error<&[u8]>>(buf) else {
        return Ok(None);
    };

    let size = usize::try_from(size)
        .ok()
        .filter(|size| (10..=MAX_PACKET_SIZE).contains(size))
        .ok_or_else(|| RconError::InvalidResponse(format!("bad packet size {size}")))?;

    if after_size.len() < size {
        return Ok(None);
    }

    let frame = &after_size[..size];
    let (frame, id) = le_i32::<_, nom::error::Error<&[u8]>>(frame)
        .map_err(|_| RconError::InvalidResponse("truncated packet id".to_string()))?;
    let (frame, ptype) = le_i32::<_, nom::error::Error<&[u8]>>(frame)
        .map_err(|_| RconError::InvalidResponse("truncated packet type".to_string()))?;

    // Strip the body and padding terminators.
    let body_end = frame.len().saturating_sub(2);
    let body = String::from_utf8_lossy(&frame[..body_end]).to_string();

    Ok(Some((Packet { id, ptype, body }, 4 + size)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_packet() {
        let encoded = encode(7, EXEC_COMMAND, "status");
        let (packet, used) = decode(&encoded).unwrap().unwrap();

        assert_eq!(used, encoded.len());
        assert_eq!(
            packet,
            Packet {
                id: 7,
                ptype: EXEC_COMMAND,
                body: "status".to_string(),
            }
        );
    }

    #[test]
    fn needs_more_data_on_partial_frames() {
        let encoded = encode(7, AUTH, "hunter2");

        assert_eq!(decode(&encoded[..3]).unwrap(), None);
        assert_eq!(decode(&encoded[..encoded.len() - 1]).unwrap(), None);
    }

    #[test]
    fn decodes_back_to_back_packets() {
        let mut stream = encode(1, RESPONSE_VALUE, "first");
        stream.extend_from_slice(&encode(2, RESPONSE_VALUE, "second"));

        let (packet, used) = decode(&stream).unwrap().unwrap();
        assert_eq!(packet.body, "first");

        let (packet, _) = decode(&stream[used..]).unwrap().unwrap();
        assert_eq!(packet.id, 2);
        assert_eq!(packet.body, "second");
    }

    #[test]
    fn rejects_absurd_sizes() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&(-5i32).to_le_bytes());
        assert!(decode(&frame).is_err());

        let mut frame = Vec::new();
        frame.extend_from_slice(&(1_000_000i32).to_le_bytes());
        assert!(decode(&frame).is_err());
    }

    #[test]
    fn empty_body_packet_is_ten_bytes() {
        let encoded = encode(9, RESPONSE_VALUE, "");
        let (packet, used) = decode(&encoded).unwrap().unwrap();

        assert_eq!(used, 14);
        assert_eq!(packet.body, "");
    }
}
