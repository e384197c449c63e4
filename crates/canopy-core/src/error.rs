//! Error types for Canopy Core.

use thiserror::Error;

/// Errors raised while encoding or decoding wire data.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("frame too large: {length} bytes (limit {limit})")]
    FrameTooLarge { length: usize, limit: usize },

    #[error("payload underflow: needed {needed} bytes, {remaining} remaining")]
    Underflow { needed: usize, remaining: usize },

    #[error("trailing bytes after payload: {0}")]
    TrailingBytes(usize),

    #[error("invalid utf-8 in payload string")]
    InvalidUtf8,

    #[error("unknown value tag: {0}")]
    UnknownValueTag(u8),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

impl CoreError {
    /// Framing errors make the byte stream unusable.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            CoreError::UnknownMessageType(_)
                | CoreError::MalformedHeader(_)
                | CoreError::FrameTooLarge { .. }
        )
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
