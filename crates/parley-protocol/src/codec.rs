//! Codec for encoding and decoding parley frames.
//!
//! Frames are JSON objects, one per transport message. There is no length
//! prefix: the transport already delimits messages.

use bytes::Bytes;
use thiserror::Error;

use crate::frames::{ChatFrame, InboundFrame, OutboundFrame, RawInbound, TypingFrame, TypingKind};

/// Maximum inbound frame size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A required field is absent or empty.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// The `type` discriminator names no known frame.
    #[error("Unknown frame type: {0}")]
    UnknownType(String),
}

/// Encode an outbound frame to bytes.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(frame: &OutboundFrame) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(frame)?;
    Ok(Bytes::from(payload))
}

/// Decode an inbound frame from bytes, capped at [`MAX_FRAME_SIZE`].
///
/// # Errors
///
/// Returns an error if the data is too large, is not a JSON object, names an
/// unknown `type`, or lacks a non-empty `to`.
pub fn decode(data: &[u8]) -> Result<InboundFrame, ProtocolError> {
    FrameCodec::default().decode(data)
}

fn decode_unchecked(data: &[u8]) -> Result<InboundFrame, ProtocolError> {
    let raw: RawInbound = serde_json::from_slice(data)?;
    let to = raw
        .to
        .filter(|to| !to.trim().is_empty())
        .ok_or(ProtocolError::MissingField("to"));

    match raw.kind.as_deref() {
        None | Some("chat") => Ok(InboundFrame::Chat(ChatFrame {
            to: to?,
            content: raw.content.unwrap_or_default(),
        })),
        Some(other) => match TypingKind::from_wire(other) {
            Some(kind) => Ok(InboundFrame::Typing(TypingFrame { kind, to: to? })),
            None => Err(ProtocolError::UnknownType(other.to_string())),
        },
    }
}

/// Inbound decoder with a configurable size cap.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl FrameCodec {
    /// Create a codec with the default size cap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec with a custom size cap.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Decode a frame from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails or the frame exceeds the cap.
    pub fn decode(&self, data: &[u8]) -> Result<InboundFrame, ProtocolError> {
        if data.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: data.len(),
                max: self.max_frame_size,
            });
        }
        decode_unchecked(data)
    }
}
