//! Per-connection session bookkeeping.
//!
//! A session owns the tree codec and the correlation table. Requests take a
//! fresh correlation id and park a waiter in the table; the matching response
//! (or an `error` with the same id) completes it. Ids are unique and short
//! lived, so a lock-free map is enough.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use canopy_core::{CborCodec, SessionId, TreeCodec};
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::trace;

use crate::error::{Result, SyncError};
use crate::protocol::{PendingRequest, Reply};

/// A parked request.
pub(crate) struct Waiter {
    pub request: PendingRequest,
    pub tx: oneshot::Sender<Result<Reply>>,
}

/// Session state shared by the reader task, the dispatcher and callers.
pub struct Session {
    id: SessionId,
    codec: Arc<dyn TreeCodec>,
    next_correlation: AtomicU32,
    pending: DashMap<u32, Waiter>,
    initialized: AtomicBool,
}

impl Session {
    /// Create a session with a random id and the CBOR codec.
    pub fn new() -> Self {
        Self::with_codec(Arc::new(CborCodec::new()))
    }

    /// Create a session with a custom tree codec.
    pub fn with_codec(codec: Arc<dyn TreeCodec>) -> Self {
        Self {
            id: SessionId::new(rand::random()),
            codec,
            next_correlation: AtomicU32::new(1),
            pending: DashMap::new(),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn codec(&self) -> &dyn TreeCodec {
        self.codec.as_ref()
    }

    pub(crate) fn codec_arc(&self) -> Arc<dyn TreeCodec> {
        self.codec.clone()
    }

    /// Whether the peer's version announcement has been accepted.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn set_initialized(&self, value: bool) {
        self.initialized.store(value, Ordering::Release);
    }

    /// Allocate a correlation id. Never returns 0, which addresses the
    /// connection itself.
    fn allocate(&self) -> u32 {
        loop {
            let id = self.next_correlation.fetch_add(1, Ordering::Relaxed);
            if id != 0 && !self.pending.contains_key(&id) {
                return id;
            }
        }
    }

    /// Park a waiter for a new request.
    pub(crate) fn begin(&self, request: PendingRequest) -> (u32, oneshot::Receiver<Result<Reply>>) {
        let id = self.allocate();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, Waiter { request, tx });
        trace!(session = %self.id, correlation = id, "request started");
        (id, rx)
    }

    /// Remove a waiter so its response can be applied.
    pub(crate) fn take(&self, correlation: u32) -> Option<Waiter> {
        self.pending.remove(&correlation).map(|(_, waiter)| waiter)
    }

    /// Fail one waiter. Returns false if nothing was waiting.
    pub(crate) fn fail(&self, correlation: u32, err: SyncError) -> bool {
        match self.take(correlation) {
            Some(waiter) => {
                let _ = waiter.tx.send(Err(err));
                true
            }
            None => false,
        }
    }

    /// Abandon a pending request. A late response finds no waiter and is
    /// discarded. Returns false if the id was not pending.
    pub fn cancel(&self, correlation: u32) -> bool {
        self.fail(correlation, SyncError::Cancelled)
    }

    /// Fail every waiter, e.g. on disconnect.
    pub(crate) fn fail_all(&self, make_err: impl Fn() -> SyncError) -> usize {
        let ids: Vec<u32> = self.pending.iter().map(|e| *e.key()).collect();
        ids.into_iter()
            .filter(|id| self.fail(*id, make_err()))
            .count()
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Correlation ids awaiting a response.
    pub fn pending_correlations(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.pending.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("pending", &self.pending.len())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
