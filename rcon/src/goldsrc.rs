//! GoldSrc RCON wire format.
//!
//! Requests are single UDP datagrams prefixed with four `0xFF` bytes.
//! Responses are either single datagrams prefixed the same way, or split
//! datagrams prefixed with `FE FF FF FF` carrying a packet id and a
//! fragment byte. The fragment byte packs **total fragments in the low
//! nibble and the 0-based fragment index in the high nibble**.

use crate::RconError;
use nom::{
    IResult,
    combinator::rest,
    number::complete::{le_i32, le_u8},
};

/// `FF FF FF FF` read as a little-endian i32.
const SINGLE_HEADER: i32 = -1;
/// `FE FF FF FF` read as a little-endian i32.
const SPLIT_HEADER: i32 = -2;

/// One decoded response datagram.
#[derive(Debug, PartialEq)]
pub enum Frame<'a> {
    /// A complete response body, trimmed.
    Complete(String),
    /// One slice of a split response; reassembled by the caller.
    Fragment(Fragment<'a>),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Fragment<'a> {
    pub packet_id: i32,
    pub total: u8,
    pub index: u8,
    pub payload: &'a [u8],
}

/// How the server judged the command, detected from the response body.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResponseKind {
    Ok,
    BadPassword,
    BadChallenge,
    UnknownCommand,
}

pub fn encode_challenge_request() -> Vec<u8> {
    let mut out = vec![0xFF; 4];
    out.extend_from_slice(b"challenge rcon\n");
    out
}

pub fn encode_command(challenge: i64, password: &str, command: &str) -> Vec<u8> {
    let mut out = vec![0xFF; 4];
    out.extend_from_slice(format!("rcon {challenge} {password} {command}\n").as_bytes());
    out
}

pub fn decode_frame(buf: &[u8]) -> Result<Frame<'_>, RconError> {
    let (body, header) = le_i32::<_, nom::error::Error<&[u8]>>(buf)
        .map_err(|_| RconError::InvalidResponse("short datagram".to_string()))?;

    match header {
        SINGLE_HEADER => Ok(Frame::Complete(single_body(body))),
        SPLIT_HEADER => {
            let (_, fragment) = split_frame(body)
                .map_err(|_| RconError::InvalidResponse("short fragment header".to_string()))?;
            Ok(Frame::Fragment(fragment))
        }
        other => Err(RconError::InvalidResponse(format!(
            "unknown packet header {other:#010x}"
        ))),
    }
}

/// Body text of a single-datagram response. Types `l` and `n` carry text
/// from the byte after the type marker; any other leading byte is part of
/// the text itself.
fn single_body(body: &[u8]) -> String {
    let text = match body.first() {
        Some(b'l') | Some(b'n') => &body[1..],
        _ => body,
    };

    String::from_utf8_lossy(text).trim().to_string()
}

/// Body text of a reassembled split response. Servers prepend the single
/// datagram framing to the reassembled payload as well.
pub fn assembled_body(payload: &[u8]) -> String {
    match decode_frame(payload) {
        Ok(Frame::Complete(body)) => body,
        _ => String::from_utf8_lossy(payload).trim().to_string(),
    }
}

fn split_frame(i: &[u8]) -> IResult<&[u8], Fragment<'_>> {
    let (i, packet_id) = le_i32(i)?;
    let (i, frag_byte) = le_u8(i)?;
    let (i, payload) = rest(i)?;

    Ok((
        i,
        Fragment {
            packet_id,
            total: frag_byte & 0x0F,
            index: frag_byte >> 4,
            payload,
        },
    ))
}

pub fn classify(body: &str) -> ResponseKind {
    if body.contains("Bad rcon_password") {
        ResponseKind::BadPassword
    } else if body.contains("Bad challenge") {
        ResponseKind::BadChallenge
    } else if body.contains("Unknown command") {
        ResponseKind::UnknownCommand
    } else {
        ResponseKind::Ok
    }
}

/// The numeric nonce out of a `challenge rcon <number>` reply.
pub fn parse_challenge(body: &str) -> Option<i64> {
    let mut tokens = body.split_whitespace();

    match (tokens.next(), tokens.next(), tokens.next(), tokens.next()) {
        (Some("challenge"), Some("rcon"), Some(number), None) => number.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_request_framing() {
        let frame = encode_command(5551212, "secret", "status");
        assert_eq!(&frame[..4], &[0xFF; 4]);
        assert_eq!(&frame[4..], b"rcon 5551212 secret status\n");

        let challenge = encode_challenge_request();
        assert_eq!(&challenge[..4], &[0xFF; 4]);
        assert_eq!(&challenge[4..], b"challenge rcon\n");
    }

    #[test]
    fn decodes_l_type_body_from_byte_five() {
        let mut datagram = vec![0xFF; 4];
        datagram.push(b'l');
        datagram.extend_from_slice(b"map is de_dust2\n");

        match decode_frame(&datagram).unwrap() {
            Frame::Complete(body) => assert_eq!(body, "map is de_dust2"),
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn decodes_other_type_body_from_byte_four() {
        let mut datagram = vec![0xFF; 4];
        datagram.extend_from_slice(b"challenge rcon 5551212\n");

        match decode_frame(&datagram).unwrap() {
            Frame::Complete(body) => {
                assert_eq!(body, "challenge rcon 5551212");
                assert_eq!(parse_challenge(&body), Some(5551212));
            }
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn decodes_fragment_nibbles_low_total_high_index() {
        let mut datagram = vec![0xFE, 0xFF, 0xFF, 0xFF];
        datagram.extend_from_slice(&1i32.to_le_bytes());
        datagram.push(0x12);
        datagram.extend_from_slice(b"World");

        match decode_frame(&datagram).unwrap() {
            Frame::Fragment(fragment) => {
                assert_eq!(fragment.packet_id, 1);
                assert_eq!(fragment.total, 2);
                assert_eq!(fragment.index, 1);
                assert_eq!(fragment.payload, b"World");
            }
            other => panic!("expected Fragment, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_header() {
        let datagram = [0x00, 0x00, 0x00, 0x00, b'x'];
        assert!(matches!(
            decode_frame(&datagram),
            Err(RconError::InvalidResponse(_))
        ));
    }

    #[test]
    fn classifies_error_strings() {
        assert_eq!(classify("Bad rcon_password.\n"), ResponseKind::BadPassword);
        assert_eq!(classify("Bad challenge.\n"), ResponseKind::BadChallenge);
        assert_eq!(
            classify("Unknown command \"frobnicate\"\n"),
            ResponseKind::UnknownCommand
        );
        assert_eq!(classify("hostname:  Big Village"), ResponseKind::Ok);
    }

    #[test]
    fn challenge_parse_rejects_other_bodies() {
        assert_eq!(parse_challenge("challenge rcon 123 extra"), None);
        assert_eq!(parse_challenge("Bad rcon_password."), None);
    }
}
