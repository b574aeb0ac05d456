//! Framing for the MythTV backend protocol.
//!
//! Frame format:
//! ```text
//! +----------+------------------------------------------+
//! | Length   | Payload                                  |
//! | ASCII    | fields joined by "[]:[]"                 |
//! +----------+------------------------------------------+
//! | 8 bytes  | Length bytes                             |
//! ```
//!
//! The length is decimal, left-justified and padded with spaces, e.g.
//! `"21      MYTH_PROTO_VERSION 91"`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::types::{DELIMITER, HEADER_SIZE, MAX_FRAME_SIZE};

/// Encode a payload into a length-prefixed frame.
pub fn encode_frame(payload: &str) -> Result<Bytes, ProtocolError> {
    let len = payload.len();
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(len, MAX_FRAME_SIZE));
    }

    let mut frame = BytesMut::with_capacity(HEADER_SIZE + len);
    frame.put_slice(format!("{:<width$}", len, width = HEADER_SIZE).as_bytes());
    frame.put_slice(payload.as_bytes());

    Ok(frame.freeze())
}

/// Try to decode the payload length from a frame header.
/// Returns None if there's not enough data yet.
pub fn decode_header(buf: &[u8]) -> Result<Option<usize>, ProtocolError> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }

    let header = &buf[..HEADER_SIZE];
    let text = std::str::from_utf8(header)
        .map_err(|_| ProtocolError::InvalidLength(String::from_utf8_lossy(header).into_owned()))?;
    let trimmed = text.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::InvalidLength(text.to_string()));
    }

    trimmed
        .parse::<usize>()
        .map(Some)
        .map_err(|_| ProtocolError::InvalidLength(text.to_string()))
}

/// Join command fields with the protocol delimiter.
pub fn join_fields<S: AsRef<str>>(fields: &[S]) -> String {
    fields
        .iter()
        .map(|f| f.as_ref())
        .collect::<Vec<_>>()
        .join(DELIMITER)
}

/// Split a payload into its fields. An empty payload has no fields.
pub fn split_fields(payload: &str) -> Vec<String> {
    if payload.is_empty() {
        return Vec::new();
    }
    payload.split(DELIMITER).map(str::to_string).collect()
}

/// Decode raw payload bytes into text.
pub fn decode_payload(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).into_owned()
}
