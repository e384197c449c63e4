//! Top-level configuration.
//!
//! ```json
//! {
//!   "bind_addr": "0.0.0.0:7400",
//!   "session": { "reader_idle_ms": 30000, "heartbeat": true },
//!   "retry": { "max_retries": 5, "delays_ms": [100, 200, 400] }
//! }
//! ```
//!
//! Every field is optional.

use std::path::Path;

use canopy_sync::{RetryConfig, SessionConfig};
use serde::{Deserialize, Serialize};

use crate::error::{CanopyError, Result};

/// Configuration for a Canopy endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanopyConfig {
    /// Per-connection behavior.
    pub session: SessionConfig,
    /// Dial schedule used by clients.
    pub retry: RetryConfig,
    /// Listen address used by servers.
    pub bind_addr: String,
}

impl Default for CanopyConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            retry: RetryConfig::default(),
            bind_addr: "127.0.0.1:0".to_string(),
        }
    }
}

impl CanopyConfig {
    /// Parse from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| CanopyError::Config(e.to_string()))
    }

    /// Read and parse a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| CanopyError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Same config, listening on `addr`.
    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = CanopyConfig::from_json_str("{}").unwrap();
        assert_eq!(config, CanopyConfig::default());
    }

    #[test]
    fn test_nested_sections() {
        let config = CanopyConfig::from_json_str(
            r#"{
                "bind_addr": "0.0.0.0:7400",
                "session": { "reader_idle_ms": 500, "default_limit": 10 },
                "retry": { "max_retries": 2, "delays_ms": [50] }
            }"#,
        )
        .unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:7400");
        assert_eq!(config.session.reader_idle_ms, 500);
        assert_eq!(config.session.default_limit, 10);
        assert_eq!(config.session.writer_idle_ms, 10_000);
        assert_eq!(config.retry, RetryConfig::new(2, [50]));
    }

    #[test]
    fn test_malformed_json() {
        let err = CanopyConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, CanopyError::Config(_)));
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canopy.json");
        std::fs::write(&path, r#"{"session": {"heartbeat": false}}"#).unwrap();

        let config = CanopyConfig::from_path(&path).unwrap();
        assert_eq!(config.session.heartbeat, Some(false));

        let missing = CanopyConfig::from_path(dir.path().join("absent.json")).unwrap_err();
        assert!(missing.to_string().contains("absent.json"));
    }
}
