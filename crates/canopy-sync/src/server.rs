//! TCP accept loop.
//!
//! Each accepted stream becomes a server-role [`Peer`] registered under its
//! remote `ip:port`. A peer whose connection dropped can be handed to
//! [`Server::reconnect`]; the next stream accepted from the same host is
//! then attached to that existing peer instead of creating a new one, so the
//! server can keep issuing requests to a client that re-dialed.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{Role, SessionConfig};
use crate::dispatch::Dispatcher;
use crate::error::{Result, SyncError};
use crate::lock;
use crate::peer::Peer;
use crate::registry::PeerRegistry;

/// Accepted peers buffered for [`Server::accept`].
const ACCEPT_BACKLOG: usize = 64;

/// Peers waiting for their client to come back, by host.
type Reconnects = Arc<Mutex<HashMap<String, Vec<(Arc<Peer>, oneshot::Sender<()>)>>>>;

/// A listening replication endpoint.
pub struct Server {
    local_addr: SocketAddr,
    registry: Arc<PeerRegistry>,
    reconnects: Reconnects,
    accepted: tokio::sync::Mutex<mpsc::Receiver<Arc<Peer>>>,
    accept_task: JoinHandle<()>,
}

impl Server {
    /// Listen on `addr` with a fresh registry.
    pub async fn bind(addr: &str, dispatcher: Dispatcher, config: SessionConfig) -> Result<Self> {
        Self::bind_with_registry(addr, dispatcher, config, PeerRegistry::new()).await
    }

    pub async fn bind_with_registry(
        addr: &str,
        dispatcher: Dispatcher,
        config: SessionConfig,
        registry: Arc<PeerRegistry>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let reconnects: Reconnects = Arc::default();
        let (accepted_tx, accepted) = mpsc::channel(ACCEPT_BACKLOG);

        let accept_task = tokio::spawn(accept_loop(
            listener,
            dispatcher,
            config,
            registry.clone(),
            reconnects.clone(),
            accepted_tx,
        ));
        info!(%local_addr, "listening");

        Ok(Self {
            local_addr,
            registry,
            reconnects,
            accepted: tokio::sync::Mutex::new(accepted),
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Every registered peer.
    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.registry.peers()
    }

    /// Next newly accepted peer (reattached peers are not reported). At most
    /// the latest undrained accepts are buffered.
    pub async fn accept(&self) -> Option<Arc<Peer>> {
        self.accepted.lock().await.recv().await
    }

    /// Wait for `peer`'s client to connect again from the same host, and
    /// attach that stream to `peer`.
    pub async fn reconnect(&self, peer: &Arc<Peer>) -> Result<()> {
        let host = peer.host().ok_or(SyncError::ConnectionClosed)?;
        let (tx, rx) = oneshot::channel();
        lock(&self.reconnects)
            .entry(host.clone())
            .or_default()
            .push((peer.clone(), tx));
        debug!(peer = %peer.id(), %host, "waiting for reconnect");
        rx.await.map_err(|_| SyncError::Cancelled)
    }

    /// Stop accepting and close every peer.
    pub fn shutdown(&self) {
        self.accept_task.abort();
        lock(&self.reconnects).clear();
        for peer in self.registry.peers() {
            peer.close();
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("peers", &self.registry.len())
            .finish()
    }
}

async fn accept_loop(
    listener: TcpListener,
    dispatcher: Dispatcher,
    config: SessionConfig,
    registry: Arc<PeerRegistry>,
    reconnects: Reconnects,
    accepted: mpsc::Sender<Arc<Peer>>,
) {
    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%remote, error = %err, "could not disable nagle");
        }
        let host = remote.ip().to_string();

        if let Some((peer, done)) = take_reconnect(&reconnects, &host) {
            info!(peer = %peer.id(), %remote, "peer reattached");
            peer.attach(stream);
            let _ = done.send(());
            continue;
        }

        let peer = accept_peer(stream, remote, &dispatcher, &config, &registry);
        // Backlog full: the peer is still reachable through the registry.
        let _ = accepted.try_send(peer);
    }
}

fn take_reconnect(reconnects: &Reconnects, host: &str) -> Option<(Arc<Peer>, oneshot::Sender<()>)> {
    let mut table = lock(reconnects);
    let waiting = table.get_mut(host)?;
    // Skip callers that gave up.
    while !waiting.is_empty() {
        let (peer, done) = waiting.remove(0);
        if !done.is_closed() {
            if waiting.is_empty() {
                table.remove(host);
            }
            return Some((peer, done));
        }
    }
    table.remove(host);
    None
}

fn accept_peer(
    stream: TcpStream,
    remote: SocketAddr,
    dispatcher: &Dispatcher,
    config: &SessionConfig,
    registry: &Arc<PeerRegistry>,
) -> Arc<Peer> {
    let peer = Peer::new(Role::Server, config.clone(), dispatcher.clone(), Some(registry));
    peer.set_host(&remote.ip().to_string());
    peer.attach(stream);
    registry.register(&peer, &remote.to_string());
    info!(peer = %peer.id(), %remote, "connection accepted");
    peer
}
