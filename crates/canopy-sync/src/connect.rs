//! Outbound connections with retry.
//!
//! Every attempt dials a fresh stream. Only a successful stream is attached
//! to a peer, so a failed attempt never disturbs existing session state.
//! Delays run on the tokio timer, never by blocking a thread.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::{RetryConfig, Role, SessionConfig};
use crate::dispatch::Dispatcher;
use crate::error::{Result, SyncError};
use crate::peer::{Peer, Redial};
use crate::registry::PeerRegistry;
use crate::transport::{host_of, BoxStream, Dialer, TcpDialer};

/// Dials peers for one dispatcher.
#[derive(Clone)]
pub struct Connector {
    dialer: Arc<dyn Dialer>,
    dispatcher: Dispatcher,
    config: SessionConfig,
    registry: Arc<PeerRegistry>,
}

impl Connector {
    /// TCP connector with its own registry.
    pub fn new(dispatcher: Dispatcher, config: SessionConfig) -> Self {
        Self {
            dialer: Arc::new(TcpDialer),
            dispatcher,
            config,
            registry: PeerRegistry::new(),
        }
    }

    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = dialer;
        self
    }

    pub fn with_registry(mut self, registry: Arc<PeerRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// One attempt.
    pub fn connect(&self, addr: &str) -> ConnectFuture {
        self.connect_with_retry(addr, RetryConfig::once())
    }

    /// Up to `1 + retry.max_retries` attempts.
    pub fn connect_with_retry(&self, addr: &str, retry: RetryConfig) -> ConnectFuture {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let this = self.clone();
        let addr = addr.to_string();

        let handle = tokio::spawn(async move {
            let stream = dial(this.dialer.as_ref(), &addr, &retry, &counter).await?;

            let peer = Peer::new(
                Role::Client,
                this.config.clone(),
                this.dispatcher.clone(),
                Some(&this.registry),
            );
            peer.set_host(host_of(&addr));
            peer.set_redial(Redial {
                dialer: this.dialer.clone(),
                addr: addr.clone(),
                retry,
            });
            peer.attach(stream);
            this.registry.register(&peer, &addr);
            info!(peer = %peer.id(), %addr, "connected");
            Ok(peer)
        });

        ConnectFuture { handle, attempts }
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("config", &self.config)
            .finish()
    }
}

/// Dial `addr` following `retry`, counting attempts in `attempts`.
pub(crate) async fn dial(
    dialer: &dyn Dialer,
    addr: &str,
    retry: &RetryConfig,
    attempts: &AtomicU32,
) -> Result<BoxStream> {
    let mut attempt = 0u32;
    loop {
        attempts.fetch_add(1, Ordering::Relaxed);
        let err = match dialer.dial(addr).await {
            Ok(stream) => return Ok(stream),
            Err(err) => err,
        };

        if retry.max_retries == 0 {
            return Err(SyncError::Io(err));
        }
        if attempt >= retry.max_retries {
            return Err(SyncError::RetriesExhausted {
                attempts: attempt + 1,
                last: err.to_string(),
            });
        }

        let delay = retry.delay_for(attempt);
        debug!(
            addr,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "dial failed, retry scheduled"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Resolves with the connected peer, or fails once attempts run out.
pub struct ConnectFuture {
    handle: JoinHandle<Result<Arc<Peer>>>,
    attempts: Arc<AtomicU32>,
}

impl ConnectFuture {
    /// Stop retrying. The future then resolves with [`SyncError::Cancelled`].
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }
}

impl Future for ConnectFuture {
    type Output = Result<Arc<Peer>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(err)) if err.is_cancelled() => Poll::Ready(Err(SyncError::Cancelled)),
            Poll::Ready(Err(err)) => Poll::Ready(Err(SyncError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                err.to_string(),
            )))),
        }
    }
}
