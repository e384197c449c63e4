//! Error types for the Canopy facade.

use canopy_core::CoreError;
use canopy_model::ModelError;
use canopy_sync::SyncError;
use thiserror::Error;

/// Errors that can occur through the facade.
#[derive(Debug, Error)]
pub enum CanopyError {
    /// Wire or codec error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Tree model error.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Protocol or connection error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Configuration could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error outside a connection, e.g. building a runtime.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CanopyError {
    /// Whether the underlying failure is a request timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CanopyError::Sync(SyncError::Timeout(_)))
    }
}

/// Result type for facade operations.
pub type Result<T> = std::result::Result<T, CanopyError>;
