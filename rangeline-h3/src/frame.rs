//! HTTP/3 frame codec and QUIC variable-length integers.
//!
//! A frame is `type (varint) | length (varint) | payload`. Response bodies can
//! be large, so [`decode_header`] lets the caller consume a DATA payload in
//! pieces instead of waiting for the whole frame.

use crate::error::H3Error;
use crate::settings::Settings;

// ── Frame type constants (RFC 9114 Section 7.2) ─────────────────────

pub const FRAME_DATA: u64 = 0x00;
pub const FRAME_HEADERS: u64 = 0x01;
pub const FRAME_CANCEL_PUSH: u64 = 0x03;
pub const FRAME_SETTINGS: u64 = 0x04;
pub const FRAME_PUSH_PROMISE: u64 = 0x05;
pub const FRAME_GOAWAY: u64 = 0x07;
pub const FRAME_MAX_PUSH_ID: u64 = 0x0d;

/// Frame types carried over from HTTP/2 that HTTP/3 forbids.
const RESERVED_H2_TYPES: [u64; 4] = [0x02, 0x06, 0x08, 0x09];

// ── Variable-length integers (RFC 9000 Section 16) ──────────────────

/// Largest value a varint can carry.
pub const VARINT_MAX: u64 = (1 << 62) - 1;

/// Number of bytes [`encode_varint`] uses for `value`.
pub fn varint_len(value: u64) -> usize {
    match value {
        0..=0x3f => 1,
        0x40..=0x3fff => 2,
        0x4000..=0x3fff_ffff => 4,
        _ => 8,
    }
}

/// Append `value` as a varint. Values above [`VARINT_MAX`] are clamped.
pub fn encode_varint(buf: &mut Vec<u8>, value: u64) {
    let value = value.min(VARINT_MAX);
    let len = varint_len(value);
    let tag = match len {
        1 => 0x00,
        2 => 0x40,
        4 => 0x80,
        _ => 0xc0,
    };
    let start = buf.len();
    buf.extend_from_slice(&value.to_be_bytes()[8 - len..]);
    buf[start] |= tag;
}

/// Decode a varint from the start of `buf`.
///
/// Returns `(value, bytes_consumed)`, or `None` if `buf` is too short.
pub fn decode_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let first = *buf.first()?;
    let len = 1usize << (first >> 6);
    let bytes = buf.get(..len)?;
    let value = bytes[1..]
        .iter()
        .fold(u64::from(first & 0x3f), |acc, &b| (acc << 8) | u64::from(b));
    Some((value, len))
}

// ── Frames ──────────────────────────────────────────────────────────

/// An HTTP/3 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data { payload: Vec<u8> },
    Headers { encoded: Vec<u8> },
    Settings(Settings),
    GoAway { id: u64 },
    /// Server push frames; this client never enables push, so seeing one is
    /// a protocol error decided by the caller.
    Push { frame_type: u64 },
    /// Unknown or extension frame. Ignored per RFC 9114 Section 9.
    Unknown { frame_type: u64 },
}

/// Type and payload length of a frame, plus the bytes the two varints took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: u64,
    pub payload_len: u64,
    pub header_len: usize,
}

/// Append a frame header.
pub fn encode_frame_header(buf: &mut Vec<u8>, frame_type: u64, payload_len: u64) {
    encode_varint(buf, frame_type);
    encode_varint(buf, payload_len);
}

impl Frame {
    /// Append this frame (header and payload) to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Frame::Data { payload } => {
                encode_frame_header(buf, FRAME_DATA, payload.len() as u64);
                buf.extend_from_slice(payload);
            }
            Frame::Headers { encoded } => {
                encode_frame_header(buf, FRAME_HEADERS, encoded.len() as u64);
                buf.extend_from_slice(encoded);
            }
            Frame::Settings(settings) => {
                encode_frame_header(buf, FRAME_SETTINGS, settings.encoded_len() as u64);
                settings.encode(buf);
            }
            Frame::GoAway { id } => {
                encode_frame_header(buf, FRAME_GOAWAY, varint_len(*id) as u64);
                encode_varint(buf, *id);
            }
            Frame::Push { frame_type } | Frame::Unknown { frame_type } => {
                encode_frame_header(buf, *frame_type, 0);
            }
        }
    }
}

/// Decode the type and length of the frame at the start of `buf`.
///
/// `Ok(None)` means more bytes are needed. Reserved HTTP/2 frame types are
/// rejected here so callers never buffer their payloads.
pub fn decode_header(buf: &[u8]) -> Result<Option<FrameHeader>, H3Error> {
    let Some((frame_type, type_len)) = decode_varint(buf) else {
        return Ok(None);
    };
    let Some((payload_len, len_len)) = decode_varint(&buf[type_len..]) else {
        return Ok(None);
    };
    if RESERVED_H2_TYPES.contains(&frame_type) {
        return Err(H3Error::FrameUnexpected);
    }
    Ok(Some(FrameHeader {
        frame_type,
        payload_len,
        header_len: type_len + len_len,
    }))
}

/// Decode one complete frame from the start of `buf`.
///
/// Returns the frame and the number of bytes it occupied, or `Ok(None)` if
/// the frame is not complete yet.
pub fn decode_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, H3Error> {
    let Some(header) = decode_header(buf)? else {
        return Ok(None);
    };
    let total = usize::try_from(header.payload_len)
        .ok()
        .and_then(|len| len.checked_add(header.header_len))
        .ok_or(H3Error::FrameError)?;
    let Some(payload) = buf.get(header.header_len..total) else {
        return Ok(None);
    };

    let frame = match header.frame_type {
        FRAME_DATA => Frame::Data {
            payload: payload.to_vec(),
        },
        FRAME_HEADERS => Frame::Headers {
            encoded: payload.to_vec(),
        },
        FRAME_SETTINGS => Frame::Settings(Settings::decode(payload).ok_or(H3Error::FrameError)?),
        FRAME_GOAWAY => match decode_varint(payload) {
            Some((id, n)) if n == payload.len() => Frame::GoAway { id },
            _ => return Err(H3Error::FrameError),
        },
        FRAME_CANCEL_PUSH | FRAME_PUSH_PROMISE | FRAME_MAX_PUSH_ID => Frame::Push {
            frame_type: header.frame_type,
        },
        frame_type => Frame::Unknown { frame_type },
    };

    Ok(Some((frame, total)))
}
