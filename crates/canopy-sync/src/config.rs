//! Session and retry configuration.
//!
//! All durations are milliseconds in the serialized form. None of these
//! values travel on the wire.

use std::time::Duration;

use canopy_core::limits::DEFAULT_MAX_FRAME_LEN;
use serde::{Deserialize, Serialize};

/// Which end of the TCP connection a peer sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepted by a [`Server`](crate::Server).
    Server,
    /// Dialed by a [`Connector`](crate::Connector).
    Client,
}

/// Per-connection behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Close the connection after this long without receiving anything.
    /// `0` disables the check.
    pub reader_idle_ms: u64,

    /// Ping interval when nothing was written.
    pub writer_idle_ms: u64,

    /// Send pings when the writer is idle. Unset means "server only".
    pub heartbeat: Option<bool>,

    /// Replication budget used when a caller does not give one.
    pub default_limit: u32,

    /// Request timeout used when a caller does not give one.
    pub default_timeout_ms: u64,

    /// Largest accepted payload.
    pub max_frame_len: usize,

    /// Re-dial automatically when a client connection drops.
    pub auto_reconnect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reader_idle_ms: 30_000,
            writer_idle_ms: 10_000,
            heartbeat: None,
            default_limit: 3000,
            default_timeout_ms: 30_000,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            auto_reconnect: false,
        }
    }
}

impl SessionConfig {
    pub fn reader_idle(&self) -> Option<Duration> {
        (self.reader_idle_ms > 0).then(|| Duration::from_millis(self.reader_idle_ms))
    }

    pub fn writer_idle(&self) -> Duration {
        Duration::from_millis(self.writer_idle_ms.max(1))
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Whether a peer in `role` sends heartbeat pings.
    pub fn heartbeat_enabled(&self, role: Role) -> bool {
        self.heartbeat.unwrap_or(role == Role::Server)
    }
}

/// Dial retry schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Delay before retry `n` is `delays_ms[min(n, len - 1)]`.
    pub delays_ms: Vec<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            delays_ms: vec![100, 200, 400, 800, 1600],
        }
    }
}

impl RetryConfig {
    /// A single attempt, no retries.
    pub fn once() -> Self {
        Self {
            max_retries: 0,
            delays_ms: Vec::new(),
        }
    }

    pub fn new(max_retries: u32, delays_ms: impl Into<Vec<u64>>) -> Self {
        Self {
            max_retries,
            delays_ms: delays_ms.into(),
        }
    }

    /// Wait before the retry following failed attempt `attempt` (0-based).
    /// The last delay repeats once the list is exhausted.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ms = match self.delays_ms.len() {
            0 => 0,
            len => self.delays_ms[(attempt as usize).min(len - 1)],
        };
        Duration::from_millis(ms)
    }
}
