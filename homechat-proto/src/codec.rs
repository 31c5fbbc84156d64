//! JSON encoding for push-channel frames.
//!
//! The real-time collaborator delivers text frames of the form
//! `{"type": "...", "payload": {...}}`. This module converts them to and
//! from [`InboundEvent`].

use crate::event::InboundEvent;

/// Maximum accepted frame length in bytes (256 KB).
pub const MAX_FRAME_LEN: usize = 256 * 1024;

/// Error type for frame encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Frame is larger than [`MAX_FRAME_LEN`].
    #[error("frame too large: {len} bytes (max {max} bytes)")]
    FrameTooLarge {
        /// Actual frame length.
        len: usize,
        /// Maximum accepted length.
        max: usize,
    },
}

/// Encodes an [`InboundEvent`] as a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the event cannot be serialized.
pub fn encode_event(event: &InboundEvent) -> Result<String, CodecError> {
    Ok(serde_json::to_string(event)?)
}

/// Decodes a JSON text frame into an [`InboundEvent`].
///
/// # Errors
///
/// Returns [`CodecError::FrameTooLarge`] for oversized frames and
/// [`CodecError::Serialization`] for anything that is not a well-formed event.
pub fn decode_event(frame: &str) -> Result<InboundEvent, CodecError> {
    if frame.len() > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge {
            len: frame.len(),
            max: MAX_FRAME_LEN,
        });
    }
    Ok(serde_json::from_str(frame)?)
}
