//! CoAP wire codec
//!
//! UDP framing (RFC 7252 §3):
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ Byte 0:    [7:6] Version  [5:4] Type  [3:0] Token Length      │
//! │ Byte 1:    Code (class.detail)                                │
//! │ Byte 2-3:  Message ID (uint16 big-endian)                     │
//! │ Token (0-8 bytes)                                             │
//! │ Options, then 0xFF + payload when a payload is present        │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! TCP framing (RFC 8323 §3.2-3.3) replaces the fixed header with a
//! variable-length length field covering options + marker + payload:
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ Byte 0:    [7:4] Length nibble  [3:0] Token Length            │
//! │ 0/1/2/4 length extension bytes (nibble 13/14/15)              │
//! │ Code, Token, Options, 0xFF + payload                          │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Option deltas and lengths use the shared nibble encoding: 0-12 inline,
//! 13 = one extension byte (value - 13), 14 = two extension bytes
//! (value - 269), 15 reserved.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::message::{Message, MessageType, Transport};
use crate::{MAX_TOKEN_LEN, PAYLOAD_MARKER};

/// Largest value expressible with the two-byte nibble extension.
pub const MAX_OPT_EXTENSION: u32 = 65804;

// ============================================================================
// UDP
// ============================================================================

/// Encode a message using the UDP framing.
pub fn encode_udp(msg: &Message) -> Result<Bytes> {
    if msg.token.len() > MAX_TOKEN_LEN {
        return Err(Error::Malformed("token longer than 8 bytes"));
    }
    let mtype = msg.mtype.unwrap_or(MessageType::Con);

    let mut buf = BytesMut::with_capacity(4 + msg.token.len() + estimate_body(msg));
    buf.put_u8(msg.version << 6 | (mtype as u8) << 4 | msg.token.len() as u8);
    buf.put_u8(msg.code.0);
    buf.put_u16(msg.message_id.unwrap_or(0));
    buf.extend_from_slice(&msg.token);
    encode_options(&mut buf, &msg.options)?;
    if !msg.payload.is_empty() {
        buf.put_u8(PAYLOAD_MARKER);
        buf.extend_from_slice(&msg.payload);
    }
    Ok(buf.freeze())
}

/// Decode a message from a UDP datagram.
pub fn decode_udp(bytes: &[u8]) -> Result<Message> {
    if bytes.len() < 4 {
        return Err(Error::Short {
            needed: 4,
            have: bytes.len(),
        });
    }
    let mut buf = bytes;

    let first = buf.get_u8();
    let version = first >> 6;
    if version != 1 {
        return Err(Error::BadVersion(version));
    }
    let mtype = MessageType::from_u8(first >> 4 & 0x03)
        .ok_or(Error::Malformed("invalid message type"))?;
    let tkl = (first & 0x0F) as usize;
    if tkl > MAX_TOKEN_LEN {
        return Err(Error::Malformed("token length exceeds 8"));
    }

    let code = buf.get_u8();
    let message_id = buf.get_u16();

    if buf.remaining() < tkl {
        return Err(Error::Short {
            needed: 4 + tkl,
            have: bytes.len(),
        });
    }
    let token = Bytes::copy_from_slice(&buf[..tkl]);
    buf.advance(tkl);

    let (options, payload) = decode_options(buf)?;

    Ok(Message {
        version,
        mtype: Some(mtype),
        token,
        message_id: Some(message_id),
        code: code.into(),
        options,
        payload,
        transport: Transport::Udp,
    })
}

// ============================================================================
// TCP
// ============================================================================

/// Encode a message using the TCP framing.
///
/// The length field covers options + payload marker + payload only; code
/// and token bytes are excluded.
pub fn encode_tcp(msg: &Message) -> Result<Bytes> {
    if msg.token.len() > MAX_TOKEN_LEN {
        return Err(Error::Malformed("token longer than 8 bytes"));
    }

    let mut body = BytesMut::with_capacity(estimate_body(msg));
    encode_options(&mut body, &msg.options)?;
    if !msg.payload.is_empty() {
        body.put_u8(PAYLOAD_MARKER);
        body.extend_from_slice(&msg.payload);
    }

    let len = body.len();
    let mut buf = BytesMut::with_capacity(6 + msg.token.len() + len);
    match len {
        0..=12 => buf.put_u8((len as u8) << 4 | msg.token.len() as u8),
        13..=268 => {
            buf.put_u8(13 << 4 | msg.token.len() as u8);
            buf.put_u8((len - 13) as u8);
        }
        269..=65804 => {
            buf.put_u8(14 << 4 | msg.token.len() as u8);
            buf.put_u16((len - 269) as u16);
        }
        _ => {
            buf.put_u8(15 << 4 | msg.token.len() as u8);
            buf.put_u32((len - 65805) as u32);
        }
    }
    buf.put_u8(msg.code.0);
    buf.extend_from_slice(&msg.token);
    buf.extend_from_slice(&body);
    Ok(buf.freeze())
}

/// Decode one message from a complete TCP frame.
pub fn decode_tcp(bytes: &[u8]) -> Result<Message> {
    if bytes.is_empty() {
        return Err(Error::Short { needed: 1, have: 0 });
    }
    let mut buf = bytes;

    let first = buf.get_u8();
    let len_nibble = first >> 4;
    let tkl = (first & 0x0F) as usize;
    if tkl > MAX_TOKEN_LEN {
        return Err(Error::Malformed("token length exceeds 8"));
    }

    let ext = length_ext_size(len_nibble);
    if buf.remaining() < ext {
        return Err(Error::Short {
            needed: 1 + ext,
            have: bytes.len(),
        });
    }
    let body_len = match len_nibble {
        0..=12 => len_nibble as usize,
        13 => buf.get_u8() as usize + 13,
        14 => buf.get_u16() as usize + 269,
        _ => buf.get_u32() as usize + 65805,
    };

    if buf.remaining() < 1 + tkl + body_len {
        return Err(Error::Short {
            needed: 1 + ext + 1 + tkl + body_len,
            have: bytes.len(),
        });
    }

    let code = buf.get_u8();
    let token = Bytes::copy_from_slice(&buf[..tkl]);
    buf.advance(tkl);

    let (options, payload) = decode_options(&buf[..body_len])?;

    Ok(Message {
        version: 1,
        mtype: None,
        token,
        message_id: None,
        code: code.into(),
        options,
        payload,
        transport: Transport::Tcp,
    })
}

/// Total frame size once enough header bytes are buffered, `None` while
/// more bytes are needed. Drives the TCP stream reassembly loop.
pub fn tcp_frame_len(buf: &[u8]) -> Option<usize> {
    if buf.is_empty() {
        return None;
    }
    let len_nibble = buf[0] >> 4;
    let tkl = (buf[0] & 0x0F) as usize;
    let ext = length_ext_size(len_nibble);
    if buf.len() < 1 + ext {
        return None;
    }
    let body_len = match len_nibble {
        0..=12 => len_nibble as usize,
        13 => buf[1] as usize + 13,
        14 => u16::from_be_bytes([buf[1], buf[2]]) as usize + 269,
        _ => u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize + 65805,
    };
    Some(1 + ext + 1 + tkl + body_len)
}

fn length_ext_size(nibble: u8) -> usize {
    match nibble {
        0..=12 => 0,
        13 => 1,
        14 => 2,
        _ => 4,
    }
}

// ============================================================================
// Options
// ============================================================================

fn encode_options(buf: &mut BytesMut, options: &BTreeMap<u16, Vec<Bytes>>) -> Result<()> {
    let mut prev = 0u16;
    for (&number, values) in options {
        for value in values {
            // Repeats encode delta 0 because prev catches up after the first.
            let delta = (number - prev) as u32;
            let length = value.len() as u32;
            let dn = nibble(delta)?;
            let ln = nibble(length)?;
            buf.put_u8(dn << 4 | ln);
            put_nibble_ext(buf, dn, delta);
            put_nibble_ext(buf, ln, length);
            buf.extend_from_slice(value);
            prev = number;
        }
    }
    Ok(())
}

fn decode_options(mut buf: &[u8]) -> Result<(BTreeMap<u16, Vec<Bytes>>, Bytes)> {
    let mut options: BTreeMap<u16, Vec<Bytes>> = BTreeMap::new();
    let mut number = 0u16;

    while buf.has_remaining() {
        let header = buf.get_u8();
        if header == PAYLOAD_MARKER {
            if !buf.has_remaining() {
                return Err(Error::Malformed("payload marker with empty payload"));
            }
            return Ok((options, Bytes::copy_from_slice(buf)));
        }

        let dn = header >> 4;
        let ln = header & 0x0F;
        if dn == 15 || ln == 15 {
            return Err(Error::Malformed("reserved option nibble"));
        }

        let delta = get_nibble_ext(&mut buf, dn)?;
        let length = get_nibble_ext(&mut buf, ln)? as usize;

        number = number
            .checked_add(delta as u16)
            .ok_or(Error::Malformed("option number overflow"))?;

        if buf.remaining() < length {
            return Err(Error::Short {
                needed: length,
                have: buf.remaining(),
            });
        }
        let value = Bytes::copy_from_slice(&buf[..length]);
        buf.advance(length);
        options.entry(number).or_default().push(value);
    }

    Ok((options, Bytes::new()))
}

fn nibble(value: u32) -> Result<u8> {
    match value {
        0..=12 => Ok(value as u8),
        13..=268 => Ok(13),
        269..=MAX_OPT_EXTENSION => Ok(14),
        _ => Err(Error::TooLarge(value)),
    }
}

fn put_nibble_ext(buf: &mut BytesMut, nibble: u8, value: u32) {
    match nibble {
        13 => buf.put_u8((value - 13) as u8),
        14 => buf.put_u16((value - 269) as u16),
        _ => {}
    }
}

fn get_nibble_ext(buf: &mut &[u8], nibble: u8) -> Result<u32> {
    match nibble {
        0..=12 => Ok(nibble as u32),
        13 => {
            if !buf.has_remaining() {
                return Err(Error::Short { needed: 1, have: 0 });
            }
            Ok(buf.get_u8() as u32 + 13)
        }
        14 => {
            if buf.remaining() < 2 {
                return Err(Error::Short {
                    needed: 2,
                    have: buf.remaining(),
                });
            }
            Ok(buf.get_u16() as u32 + 269)
        }
        _ => Err(Error::Malformed("reserved option nibble")),
    }
}

fn estimate_body(msg: &Message) -> usize {
    let opts: usize = msg
        .options
        .values()
        .flatten()
        .map(|v| v.len() + 3)
        .sum();
    opts + if msg.payload.is_empty() {
        0
    } else {
        1 + msg.payload.len()
    }
}
