//! JSON text-frame codec for the chat socket.
//!
//! Decoding is split in two steps: [`decode`] turns text into a
//! [`WireFrame`] (failing only on malformed JSON), and [`decode_event`]
//! additionally filters out frames whose kind is not recognized.

use crate::frame::{InboundEvent, WireFrame};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The text is not a valid frame.
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Encodes a [`WireFrame`] as a JSON text frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the frame cannot be serialized.
pub fn encode(frame: &WireFrame) -> Result<String, CodecError> {
    serde_json::to_string(frame).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`WireFrame`] from JSON text.
///
/// # Errors
///
/// Returns `CodecError::Malformed` if the text is not a JSON object with a
/// string `type` field.
pub fn decode(text: &str) -> Result<WireFrame, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))
}

/// Decodes a frame and maps it to an [`InboundEvent`].
///
/// Returns `Ok(None)` for well-formed frames of an unrecognized kind.
///
/// # Errors
///
/// Returns `CodecError::Malformed` if the text is not a valid frame.
pub fn decode_event(text: &str) -> Result<Option<InboundEvent>, CodecError> {
    decode(text).map(InboundEvent::from_frame)
}
