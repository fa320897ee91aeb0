//! Codec for Server-Sent Events frames.
//!
//! Each broadcast is written to subscribers as a single event frame:
//!
//! ```text
//! data: {"type":"info","message":"hello","timestamp":"..."}\n\n
//! ```
//!
//! Lines starting with `:` are comments. The relay uses them for keep-alive
//! frames and decoders skip them.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::message::Message;

/// Field prefix of a data line.
pub const DATA_PREFIX: &[u8] = b"data: ";

/// Blank line terminating a frame.
pub const FRAME_TERMINATOR: &[u8] = b"\n\n";

/// Comment frame sent on idle streams.
pub const KEEP_ALIVE_FRAME: &[u8] = b": keep-alive\n\n";

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Not enough data to decode a frame.
    #[error("Incomplete frame: missing terminator")]
    Incomplete,

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// JSON decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),

    /// Invalid frame data.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Encode a message into one event frame.
///
/// JSON never contains a raw newline, so the payload always fits on a single
/// `data:` line.
///
/// # Errors
///
/// Returns an error if the message cannot be serialized.
pub fn encode(message: &Message) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(message, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a message into an existing buffer.
///
/// # Errors
///
/// Returns an error if the message cannot be serialized.
pub fn encode_into(message: &Message, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = serde_json::to_vec(message).map_err(ProtocolError::Encode)?;

    buf.reserve(DATA_PREFIX.len() + payload.len() + FRAME_TERMINATOR.len());
    buf.put_slice(DATA_PREFIX);
    buf.put_slice(&payload);
    buf.put_slice(FRAME_TERMINATOR);

    Ok(())
}

/// The keep-alive comment frame.
#[must_use]
pub fn keep_alive() -> Bytes {
    Bytes::from_static(KEEP_ALIVE_FRAME)
}

/// Decode a single complete frame.
///
/// # Errors
///
/// Returns an error if the frame is unterminated, carries no data, or the
/// data is not a valid message.
pub fn decode(data: &[u8]) -> Result<Message, ProtocolError> {
    let end = find_terminator(data).ok_or(ProtocolError::Incomplete)?;
    match parse_frame(&data[..end])? {
        Some(message) => Ok(message),
        None => Err(ProtocolError::Invalid("frame has no data field".into())),
    }
}

/// Try to decode the next message from a buffer, advancing past every frame
/// consumed.
///
/// Comment-only frames are skipped. Returns `Ok(None)` if more data is
/// needed.
///
/// # Errors
///
/// Returns an error if a complete frame is invalid. The frame is consumed.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Message>, ProtocolError> {
    while let Some(end) = find_terminator(buf) {
        let frame = buf.split_to(end);
        buf.advance(FRAME_TERMINATOR.len());

        if let Some(message) = parse_frame(&frame)? {
            return Ok(Some(message));
        }
    }

    Ok(None)
}

fn find_terminator(data: &[u8]) -> Option<usize> {
    data.windows(FRAME_TERMINATOR.len())
        .position(|w| w == FRAME_TERMINATOR)
}

/// Parse the lines of one frame. `None` means the frame held no data lines.
fn parse_frame(frame: &[u8]) -> Result<Option<Message>, ProtocolError> {
    let text = std::str::from_utf8(frame)
        .map_err(|e| ProtocolError::Invalid(format!("frame is not UTF-8: {e}")))?;

    let mut data: Option<String> = None;
    for line in text.split('\n') {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            }
        }
    }

    data.map(|json| serde_json::from_str(&json).map_err(ProtocolError::Decode))
        .transpose()
}
