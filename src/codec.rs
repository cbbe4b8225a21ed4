/// Minimal RFC 7252 §3 wire codec
///
/// This crate treats the wire codec as an external collaborator (see
/// the crate-level docs), but needs *something* concrete to drive the
/// round-trip law and the end-to-end tests against. This is that
/// something: fixed 4-byte header, token, delta-encoded TLV options in
/// ascending option-number order, and an optional `0xFF`-prefixed
/// payload.
use std::fmt;

use crate::message::{Code, Message, OptionNumber, Options, Token, Type};

const VERSION: u8 = 1;
const PAYLOAD_MARKER: u8 = 0xFF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    TooShort,
    UnsupportedVersion(u8),
    TokenLengthOutOfRange(u8),
    TruncatedOption,
    TruncatedPayload,
    ReservedOptionLength,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "datagram shorter than the fixed header"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported CoAP version {}", v),
            Self::TokenLengthOutOfRange(tkl) => write!(f, "token length nibble {} out of range", tkl),
            Self::TruncatedOption => write!(f, "option truncated"),
            Self::TruncatedPayload => write!(f, "payload marker present but no payload followed"),
            Self::ReservedOptionLength => write!(f, "reserved option delta/length nibble 15 used without extension"),
        }
    }
}

impl std::error::Error for CodecError {}

fn type_bits(t: Type) -> u8 {
    match t {
        Type::Con => 0,
        Type::Non => 1,
        Type::Ack => 2,
        Type::Rst => 3,
    }
}

fn type_from_bits(bits: u8) -> Type {
    match bits {
        0 => Type::Con,
        1 => Type::Non,
        2 => Type::Ack,
        _ => Type::Rst,
    }
}

/// Best-effort extraction of just the type and Message ID from a
/// datagram that otherwise failed to `decode`, so the caller can still
/// emit a Reset for a malformed Confirmable message (§7: "message is
/// dropped and, if it was a CON, a Reset is emitted").
pub fn peek_header(bytes: &[u8]) -> Option<(Type, u16)> {
    if bytes.len() < 4 {
        return None;
    }
    let mtype = type_from_bits((bytes[0] >> 4) & 0x3);
    let message_id = ((bytes[2] as u16) << 8) | bytes[3] as u16;
    Some((mtype, message_id))
}

pub fn encode(msg: &Message) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + msg.payload.len());

    let tkl = msg.token.len() as u8;
    out.push((VERSION << 6) | (type_bits(msg.mtype) << 4) | tkl);
    out.push(msg.code.0);
    out.push((msg.message_id >> 8) as u8);
    out.push((msg.message_id & 0xff) as u8);
    out.extend_from_slice(msg.token.as_slice());

    let mut last_number = 0u16;
    for (number, value) in msg.options.iter() {
        let delta = number.0 - last_number;
        last_number = number.0;
        let length = value.len() as u16;

        let delta_nibble: u8 = if delta < 13 {
            delta as u8
        } else if delta < 269 {
            13
        } else {
            14
        };
        let length_nibble: u8 = if length < 13 {
            length as u8
        } else if length < 269 {
            13
        } else {
            14
        };

        out.push((delta_nibble << 4) | length_nibble);

        if delta_nibble == 13 {
            out.push((delta - 13) as u8);
        } else if delta_nibble == 14 {
            let v = delta - 269;
            out.push((v >> 8) as u8);
            out.push((v & 0xff) as u8);
        }
        if length_nibble == 13 {
            out.push((length - 13) as u8);
        } else if length_nibble == 14 {
            let v = length - 269;
            out.push((v >> 8) as u8);
            out.push((v & 0xff) as u8);
        }

        out.extend_from_slice(value);
    }

    if !msg.payload.is_empty() {
        out.push(PAYLOAD_MARKER);
        out.extend_from_slice(&msg.payload);
    }

    out
}

pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    if bytes.len() < 4 {
        return Err(CodecError::TooShort);
    }

    let version = bytes[0] >> 6;
    if version != VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let mtype = type_from_bits((bytes[0] >> 4) & 0x3);
    let tkl = bytes[0] & 0x0f;
    if tkl > 8 {
        return Err(CodecError::TokenLengthOutOfRange(tkl));
    }
    let code = Code(bytes[1]);
    let message_id = ((bytes[2] as u16) << 8) | bytes[3] as u16;

    let mut pos = 4usize;
    if bytes.len() < pos + tkl as usize {
        return Err(CodecError::TruncatedOption);
    }
    let token = Token::from_slice(&bytes[pos..pos + tkl as usize]);
    pos += tkl as usize;

    let mut options = Options::new();
    let mut last_number = 0u16;

    while pos < bytes.len() {
        if bytes[pos] == PAYLOAD_MARKER {
            pos += 1;
            if pos >= bytes.len() {
                return Err(CodecError::TruncatedPayload);
            }
            let payload = bytes[pos..].to_vec();
            return Ok(Message {
                mtype,
                code,
                message_id,
                token,
                options,
                payload,
            });
        }

        let header = bytes[pos];
        pos += 1;
        let delta_nibble = header >> 4;
        let length_nibble = header & 0x0f;

        if delta_nibble == 15 || length_nibble == 15 {
            return Err(CodecError::ReservedOptionLength);
        }

        let delta: u16 = match delta_nibble {
            13 => {
                let b = *bytes.get(pos).ok_or(CodecError::TruncatedOption)?;
                pos += 1;
                13 + b as u16
            }
            14 => {
                let hi = *bytes.get(pos).ok_or(CodecError::TruncatedOption)?;
                let lo = *bytes.get(pos + 1).ok_or(CodecError::TruncatedOption)?;
                pos += 2;
                269 + ((hi as u16) << 8 | lo as u16)
            }
            n => n as u16,
        };

        let length: u16 = match length_nibble {
            13 => {
                let b = *bytes.get(pos).ok_or(CodecError::TruncatedOption)?;
                pos += 1;
                13 + b as u16
            }
            14 => {
                let hi = *bytes.get(pos).ok_or(CodecError::TruncatedOption)?;
                let lo = *bytes.get(pos + 1).ok_or(CodecError::TruncatedOption)?;
                pos += 2;
                269 + ((hi as u16) << 8 | lo as u16)
            }
            n => n as u16,
        };

        let number = last_number + delta;
        last_number = number;

        if bytes.len() < pos + length as usize {
            return Err(CodecError::TruncatedOption);
        }
        let value = bytes[pos..pos + length as usize].to_vec();
        pos += length as usize;

        options.insert(OptionNumber(number), value);
    }

    Ok(Message {
        mtype,
        code,
        message_id,
        token,
        options,
        payload: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MAX_TOKEN_LEN;

    fn sample(token_len: usize) -> Message {
        let token = Token::from_slice(&[0xAA; MAX_TOKEN_LEN][..token_len]);
        let mut options = Options::new();
        options.insert(OptionNumber::URI_PATH, b"sensors".to_vec());
        options.insert(OptionNumber::CONTENT_FORMAT, vec![0]);
        Message::new(Type::Con, Code::new(2, 5), 0x1234, token)
            .with_options(options)
            .with_payload(b"ok".to_vec())
    }

    #[test]
    fn round_trip_with_payload_and_options() {
        let msg = sample(2);
        let bytes = encode(&msg);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn round_trip_without_payload() {
        let msg = Message::new(Type::Ack, Code::EMPTY, 7, Token::EMPTY);
        let bytes = encode(&msg);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn round_trip_with_extended_option_delta() {
        let mut options = Options::new();
        options.insert(OptionNumber(300), vec![1, 2, 3]);
        let msg = Message::new(Type::Non, Code::GET, 1, Token::from_slice(&[1]))
            .with_options(options);
        let bytes = encode(&msg);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn round_trip_with_large_value_length() {
        let mut options = Options::new();
        options.insert(OptionNumber::URI_PATH, vec![b'x'; 400]);
        let msg = Message::new(Type::Con, Code::PUT, 2, Token::from_slice(&[9, 9]))
            .with_options(options)
            .with_payload(vec![0u8; 10]);
        let bytes = encode(&msg);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn decode_rejects_short_datagram() {
        assert_eq!(decode(&[1, 2]), Err(CodecError::TooShort));
    }

    #[test]
    fn decode_rejects_unsupported_version() {
        let bytes = vec![0x00, 0x01, 0x00, 0x00];
        assert_eq!(decode(&bytes), Err(CodecError::UnsupportedVersion(0)));
    }

    #[test]
    fn decode_rejects_truncated_payload_marker() {
        let bytes = vec![(1 << 6) | 0, 1, 0, 0, 0xFF];
        assert_eq!(decode(&bytes), Err(CodecError::TruncatedPayload));
    }
}
