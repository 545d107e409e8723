//! Length-prefixed MessagePack framing.
//!
//! On the wire a frame is a `u32` big-endian body length followed by the
//! body: the [`Frame`] serialized as a MessagePack map, so fields are keyed
//! by name and clients in other languages can decode it without a schema.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frames::Frame;

/// Largest encoded frame body accepted in either direction (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Bytes taken by the big-endian length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The length prefix, or an encoded body, is above [`MAX_FRAME_SIZE`].
    #[error("Frame of {0} bytes exceeds the {MAX_FRAME_SIZE} byte limit")]
    FrameTooLarge(usize),

    /// `decode` was handed a truncated frame.
    #[error("Incomplete frame: {0} more bytes needed")]
    Incomplete(usize),

    #[error("Failed to encode frame: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Failed to decode frame: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Body length announced by the prefix at the start of `data`, if the
/// prefix is complete.
fn announced_length(data: &[u8]) -> Result<Option<usize>, ProtocolError> {
    let Some(prefix) = data.get(..LENGTH_PREFIX_SIZE) else {
        return Ok(None);
    };
    let mut prefix = prefix;
    let length = prefix.get_u32() as usize;
    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }
    Ok(Some(length))
}

/// Encode a frame with its length prefix.
///
/// The body is serialized straight into the output buffer and the prefix is
/// filled in afterwards.
///
/// # Errors
///
/// Returns an error if serialization fails or the body is above
/// [`MAX_FRAME_SIZE`].
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::with_capacity(64);
    buf.put_u32(0);
    rmp_serde::encode::write_named(&mut (&mut buf).writer(), frame)?;

    let body = buf.len() - LENGTH_PREFIX_SIZE;
    if body > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(body));
    }
    buf[..LENGTH_PREFIX_SIZE].copy_from_slice(&(body as u32).to_be_bytes());
    Ok(buf.freeze())
}

/// Decode the frame at the start of `data`. Trailing bytes are ignored.
///
/// # Errors
///
/// Returns an error if `data` is shorter than the announced frame, the
/// announced length is too large, or the body is not a valid frame.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    let length = announced_length(data)?
        .ok_or_else(|| ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()))?;

    let end = LENGTH_PREFIX_SIZE + length;
    let body = data
        .get(LENGTH_PREFIX_SIZE..end)
        .ok_or_else(|| ProtocolError::Incomplete(end - data.len()))?;
    Ok(rmp_serde::from_slice(body)?)
}

/// Take the next complete frame off the front of a read buffer.
///
/// Returns `Ok(None)` and leaves `buf` untouched while the frame is still
/// partial.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] without consuming anything, so
/// the stream cannot be resynchronized. A complete but undecodable frame is
/// consumed before its [`ProtocolError::Decode`] is returned, and the next
/// call continues with the frame after it.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    let Some(length) = announced_length(buf)? else {
        return Ok(None);
    };
    if buf.len() < LENGTH_PREFIX_SIZE + length {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let body = buf.split_to(length);
    Ok(Some(rmp_serde::from_slice(&body)?))
}
