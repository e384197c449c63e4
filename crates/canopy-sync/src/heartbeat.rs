//! Idle detection for one connection.
//!
//! ```text
//!            any inbound bytes
//!          +------------------+
//!          v                  |
//!       ALIVE ----------------+
//!          |
//!          | reader idle for `reader_idle_ms`
//!          v
//!        DEAD  -> connection closed, peer unregistered
//! ```
//!
//! The writer side pings with `heartbeat{reply: false}` after
//! `writer_idle_ms` without outbound traffic; the receiver answers with
//! `heartbeat{reply: true}`, which counts as inbound traffic on the pinging side.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::{Role, SessionConfig};

/// The reader saw no inbound bytes for the idle interval; the link is dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderIdle;

/// What the writer should do next.
#[derive(Debug)]
pub enum WriterEvent<T> {
    /// Send this item.
    Item(T),
    /// Nothing was written for the idle interval; send a ping.
    Ping,
    /// Every sender is gone.
    Closed,
}

/// Idle thresholds for one connection.
#[derive(Debug, Clone, Copy)]
pub struct Liveness {
    reader_idle: Option<Duration>,
    writer_idle: Duration,
    pings: bool,
}

impl Liveness {
    pub fn new(config: &SessionConfig, role: Role) -> Self {
        Self {
            reader_idle: config.reader_idle(),
            writer_idle: config.writer_idle(),
            pings: config.heartbeat_enabled(role),
        }
    }

    /// Whether this side sends pings.
    pub fn sends_pings(&self) -> bool {
        self.pings
    }

    /// Await one read, bounded by the reader idle timeout.
    ///
    /// Returns `Err(ReaderIdle)` when the timeout elapses first.
    pub async fn read<F: Future>(&self, read: F) -> Result<F::Output, ReaderIdle> {
        match self.reader_idle {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| ReaderIdle),
            None => Ok(read.await),
        }
    }

    /// Next thing for the writer to do.
    ///
    /// When pings are disabled this simply waits for the next item.
    pub async fn next_outbound<T>(&self, rx: &mut mpsc::UnboundedReceiver<T>) -> WriterEvent<T> {
        if !self.pings {
            return match rx.recv().await {
                Some(item) => WriterEvent::Item(item),
                None => WriterEvent::Closed,
            };
        }
        match tokio::time::timeout(self.writer_idle, rx.recv()).await {
            Ok(Some(item)) => WriterEvent::Item(item),
            Ok(None) => WriterEvent::Closed,
            Err(_) => WriterEvent::Ping,
        }
    }
}
