//! Error types for the sync module.

use canopy_core::{CoreError, ErrorCode, NetworkId};
use canopy_model::ModelError;
use thiserror::Error;

/// Errors that can occur during protocol operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Corrupt header, unknown message type or oversize frame.
    #[error("framing error: {0}")]
    Framing(String),

    /// Protocol version mismatch with peer.
    #[error("protocol version mismatch: local={local}, peer={peer}")]
    VersionMismatch { local: u8, peer: u8 },

    /// No response within the deadline.
    #[error("timeout after {0} ms")]
    Timeout(u64),

    /// The peer reported a failure for this request.
    #[error("remote error ({code:?}): {message}")]
    Remote {
        code: ErrorCode,
        message: String,
        /// Remote context, e.g. the failing script location.
        context: String,
    },

    /// The connection went away before the request completed.
    #[error("connection closed")]
    ConnectionClosed,

    /// A payload or tree blob could not be decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Socket error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The network id is not mapped on this side.
    #[error("unknown network id: {0}")]
    UnknownNetId(NetworkId),

    /// Tree model error.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// The operation was abandoned.
    #[error("cancelled")]
    Cancelled,

    /// Every dial attempt failed.
    #[error("connect failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl SyncError {
    /// Whether this error must close the connection it occurred on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Framing(_) | SyncError::VersionMismatch { .. } | SyncError::Codec(_)
        )
    }

    /// Wire error code used when reporting this error to the peer.
    pub fn code(&self) -> ErrorCode {
        match self {
            SyncError::VersionMismatch { .. } => ErrorCode::VersionMismatch,
            SyncError::UnknownNetId(_) => ErrorCode::UnknownNetId,
            SyncError::Model(ModelError::InvalidQuery { .. })
            | SyncError::Model(ModelError::UnboundVariable(_)) => ErrorCode::InvalidQuery,
            SyncError::Model(ModelError::Script(_)) => ErrorCode::ExecutionFailed,
            SyncError::Remote { code, .. } => *code,
            SyncError::Framing(_) | SyncError::Codec(_) => ErrorCode::InvalidMessage,
            _ => ErrorCode::InternalError,
        }
    }
}

impl From<CoreError> for SyncError {
    fn from(e: CoreError) -> Self {
        if e.is_framing() {
            SyncError::Framing(e.to_string())
        } else {
            SyncError::Codec(e.to_string())
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(SyncError::Framing("x".into()).is_fatal());
        assert!(SyncError::VersionMismatch { local: 1, peer: 2 }.is_fatal());
        assert!(SyncError::Codec("x".into()).is_fatal());
        assert!(!SyncError::Timeout(10).is_fatal());
        assert!(!SyncError::ConnectionClosed.is_fatal());
        assert!(!SyncError::Remote {
            code: ErrorCode::ExecutionFailed,
            message: "boom".into(),
            context: String::new(),
        }
        .is_fatal());
    }

    #[test]
    fn test_core_errors_split_by_kind() {
        let framing: SyncError = CoreError::UnknownMessageType(0x7f).into();
        assert!(matches!(framing, SyncError::Framing(_)));
        let codec: SyncError = CoreError::InvalidUtf8.into();
        assert!(matches!(codec, SyncError::Codec(_)));
    }
}
