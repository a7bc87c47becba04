//! Codec for encoding and decoding Parlor frames.
//!
//! Two encodings are supported:
//!
//! - **JSON** text messages, one frame per message (browser clients).
//! - **MessagePack** binary messages with a 4-byte big-endian length prefix.
//!   Several frames may be packed into one binary message.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::str::FromStr;
use thiserror::Error;

/// Maximum frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame decoded but failed validation.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Wire encoding negotiated for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// JSON text messages.
    #[default]
    Json,
    /// Length-prefixed MessagePack binary messages.
    MessagePack,
}

impl FromStr for Encoding {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Encoding::Json),
            "msgpack" | "messagepack" => Ok(Encoding::MessagePack),
            other => Err(ProtocolError::Invalid(format!("unknown encoding: {other}"))),
        }
    }
}

/// Encode a frame as a length-prefixed MessagePack buffer.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode<T: Serialize>(frame: &T) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a frame into an existing buffer.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into<T: Serialize>(frame: &T, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(frame)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode a single length-prefixed MessagePack frame.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    let frame = rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?;
    Ok(frame)
}

/// Try to decode a frame from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(frame))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from<T: DeserializeOwned>(buf: &mut BytesMut) -> Result<Option<T>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    let frame = rmp_serde::from_slice(&payload)?;

    Ok(Some(frame))
}

/// Encode a frame as a JSON string.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_json<T: Serialize>(frame: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode a frame from a JSON string.
///
/// # Errors
///
/// Returns an error if the text is not a valid frame.
pub fn decode_json<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{ClientFrame, ServerFrame};

    #[test]
    fn test_msgpack_tagged_frames() {
        let frames = vec![
            ClientFrame::join_room("alice", "Main"),
            ClientFrame::private_message("alice", "Main", "psst", "bob"),
            ClientFrame::Ping { timestamp: Some(7) },
        ];

        for frame in frames {
            let encoded = encode(&frame).unwrap();
            let decoded: ClientFrame = decode(&encoded).unwrap();
            assert_eq!(frame, decoded);
        }
    }

    #[test]
    fn test_decode_incomplete() {
        let encoded = encode(&ClientFrame::join_room("alice", "Main")).unwrap();

        match decode::<ClientFrame>(&encoded[..5]) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_length_prefix() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        buf.extend_from_slice(&[0u8; 8]);

        match decode_from::<ClientFrame>(&mut buf) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_streaming_decode() {
        let first = ServerFrame::connected(1);
        let second = ServerFrame::online_users(vec!["alice".into()]);

        let mut buf = BytesMut::new();
        encode_into(&first, &mut buf).unwrap();
        encode_into(&second, &mut buf).unwrap();

        assert_eq!(decode_from::<ServerFrame>(&mut buf).unwrap(), Some(first));
        assert_eq!(decode_from::<ServerFrame>(&mut buf).unwrap(), Some(second));
        assert!(buf.is_empty());
        assert_eq!(decode_from::<ServerFrame>(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_json_unknown_type() {
        let result = decode_json::<ClientFrame>(r#"{"type":"subscribe","channel":"x"}"#);
        assert!(matches!(result, Err(ProtocolError::Json(_))));
    }

    #[test]
    fn test_encoding_from_str() {
        assert_eq!("json".parse::<Encoding>().unwrap(), Encoding::Json);
        assert_eq!("MsgPack".parse::<Encoding>().unwrap(), Encoding::MessagePack);
        assert!("xml".parse::<Encoding>().is_err());
    }
}
