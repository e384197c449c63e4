//! A peer: one end of a replication session.
//!
//! Peers are symmetric. Either side may bind, sync, query or execute
//! against the other, and either side answers requests against its own
//! tree. A peer outlives its connections: a lost stream fails pending
//! requests and drops bind state, and a later [`Peer::attach`] (server-side
//! reconnect) or [`Peer::reconnect`] (client re-dial) brings it back.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use canopy_core::{Message, NetworkId, SessionId};
use canopy_model::NodeKey;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{RetryConfig, Role, SessionConfig};
use crate::connect;
use crate::connection::{self, LinkSlot};
use crate::dispatch::Dispatcher;
use crate::error::{Result, SyncError};
use crate::lock;
use crate::mirror::Mirror;
use crate::protocol::{PendingRequest, Reply};
use crate::registry::PeerRegistry;
use crate::responder::Responder;
use crate::session::Session;
use crate::transport::Dialer;

/// How a client peer dials its server again.
#[derive(Clone)]
pub(crate) struct Redial {
    pub dialer: Arc<dyn Dialer>,
    pub addr: String,
    pub retry: RetryConfig,
}

/// One end of a session.
pub struct Peer {
    role: Role,
    config: SessionConfig,
    session: Session,
    dispatcher: Dispatcher,
    link: Arc<LinkSlot>,
    responder: Arc<Responder>,
    /// Trees this side bound from the other end.
    mirror: Arc<Mutex<Mirror>>,
    host: Mutex<Option<String>>,
    registry: Option<Weak<PeerRegistry>>,
    /// Names held when the last connection dropped; restored on attach.
    names: Mutex<Vec<String>>,
    redial: Mutex<Option<Redial>>,
    closing: AtomicBool,
    connected: watch::Sender<bool>,
}

impl Peer {
    /// Create an unattached peer.
    pub fn new(
        role: Role,
        config: SessionConfig,
        dispatcher: Dispatcher,
        registry: Option<&Arc<PeerRegistry>>,
    ) -> Arc<Self> {
        let link = Arc::new(LinkSlot::new());
        let responder = Arc::new(Responder::new(link.clone(), config.default_limit as usize));
        let (connected, _) = watch::channel(false);
        Arc::new(Self {
            role,
            config,
            session: Session::new(),
            dispatcher,
            link,
            responder,
            mirror: Arc::new(Mutex::new(Mirror::new())),
            host: Mutex::new(None),
            registry: registry.map(Arc::downgrade),
            names: Mutex::new(Vec::new()),
            redial: Mutex::new(None),
            closing: AtomicBool::new(false),
            connected,
        })
    }

    pub fn id(&self) -> SessionId {
        self.session.id()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Remote host this peer connected from or to.
    pub fn host(&self) -> Option<String> {
        lock(&self.host).clone()
    }

    pub fn set_host(&self, host: &str) {
        *lock(&self.host) = Some(host.to_string());
    }

    pub(crate) fn link(&self) -> &LinkSlot {
        &self.link
    }

    pub(crate) fn responder(&self) -> &Arc<Responder> {
        &self.responder
    }

    pub(crate) fn mirror(&self) -> MutexGuard<'_, Mirror> {
        lock(&self.mirror)
    }

    pub(crate) fn mirror_map(&self) -> Arc<Mutex<Mirror>> {
        self.mirror.clone()
    }

    pub(crate) fn set_redial(&self, redial: Redial) {
        *lock(&self.redial) = Some(redial);
    }

    fn registry(&self) -> Option<Arc<PeerRegistry>> {
        self.registry.as_ref().and_then(Weak::upgrade)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Connection lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Run this peer over `stream`, replacing any current connection.
    ///
    /// Names the peer was registered under when its last connection dropped
    /// are registered again.
    pub fn attach<S>(self: &Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.closing.store(false, Ordering::Release);
        self.connected.send_replace(true);
        let generation = connection::spawn(self, stream);

        let names = std::mem::take(&mut *lock(&self.names));
        if let Some(registry) = self.registry() {
            for name in &names {
                registry.register(self, name);
            }
        }
        info!(peer = %self.id(), role = ?self.role, generation, "peer attached");
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_open()
    }

    /// Resolve once the current connection (if any) is gone.
    pub async fn closed(&self) {
        let mut rx = self.connected.subscribe();
        let _ = rx.wait_for(|up| !*up).await;
    }

    /// Flush queued messages and close the connection. Does not re-dial.
    pub fn close(&self) {
        self.closing.store(true, Ordering::Release);
        if self.link.close() {
            debug!(peer = %self.id(), "close requested");
        }
    }

    /// Dial the same address again and attach the new stream.
    ///
    /// Only peers created by a [`Connector`](crate::Connector) know where to
    /// dial; server-side peers are reattached by
    /// [`Server::reconnect`](crate::Server::reconnect).
    pub async fn reconnect(self: &Arc<Self>) -> Result<()> {
        let redial = lock(&self.redial).clone().ok_or_else(|| {
            SyncError::Io(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "peer has no dial address",
            ))
        })?;
        let attempts = AtomicU32::new(0);
        let stream = connect::dial(redial.dialer.as_ref(), &redial.addr, &redial.retry, &attempts).await?;
        self.attach(stream);
        Ok(())
    }

    /// Queue a message on the current connection.
    pub(crate) fn send(&self, message: Message) -> Result<()> {
        self.link.send(message)
    }

    /// Tear down after the connection of `generation` ended.
    pub(crate) fn link_lost(self: &Arc<Self>, generation: u64, reason: SyncError) {
        if !self.link.release(generation) {
            debug!(peer = %self.id(), generation, "stale connection ended");
            return;
        }
        self.session.set_initialized(false);

        let version = match &reason {
            SyncError::VersionMismatch { local, peer } => Some((*local, *peer)),
            _ => None,
        };
        let failed = self.session.fail_all(|| match version {
            Some((local, peer)) => SyncError::VersionMismatch { local, peer },
            None => SyncError::ConnectionClosed,
        });

        let peer = self.clone();
        let _ = self.dispatcher.submit(move |ctx| {
            peer.responder.detach(&mut ctx.model);
            peer.mirror().clear();
        });

        if let Some(registry) = self.registry() {
            let names = registry.unregister_all(self);
            if !names.is_empty() {
                *lock(&self.names) = names;
            }
        }
        self.connected.send_replace(false);
        info!(peer = %self.id(), reason = %reason, failed, "peer disconnected");

        let closing = self.closing.load(Ordering::Acquire);
        if self.config.auto_reconnect && !closing && lock(&self.redial).is_some() {
            let peer = self.clone();
            tokio::spawn(async move {
                if let Err(err) = peer.reconnect().await {
                    warn!(peer = %peer.id(), error = %err, "reconnect failed");
                }
            });
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Requests
    // ─────────────────────────────────────────────────────────────────────────

    /// Send a correlated request and wait for its applied reply.
    ///
    /// On timeout the correlation id is released; a late response is then
    /// discarded. The connection stays open.
    pub(crate) async fn request<F>(
        &self,
        pending: PendingRequest,
        timeout: Duration,
        build: F,
    ) -> Result<Reply>
    where
        F: FnOnce(u32) -> Message,
    {
        if !self.is_connected() {
            return Err(SyncError::ConnectionClosed);
        }
        let (correlation, rx) = self.session.begin(pending);
        if let Err(err) = self.send(build(correlation)) {
            self.session.take(correlation);
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SyncError::ConnectionClosed),
            Err(_) => {
                self.session.take(correlation);
                debug!(peer = %self.id(), correlation, "request timed out");
                Err(SyncError::Timeout(timeout.as_millis() as u64))
            }
        }
    }

    /// Network id of a mirrored node, if this side bound it.
    pub fn net_id_of(&self, key: NodeKey) -> Option<NetworkId> {
        self.mirror().ids.net(key)
    }

    /// Mirrored node for a network id.
    pub fn node_of(&self, net_id: NetworkId) -> Option<NodeKey> {
        self.mirror().ids.key(net_id)
    }

    /// Number of mirrored nodes with a live network id.
    pub fn mirrored_count(&self) -> usize {
        self.mirror().ids.len()
    }

    /// Number of local nodes the remote side holds a copy of.
    pub fn bound_count(&self) -> usize {
        self.responder.bound_count()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Echo suppression
    // ─────────────────────────────────────────────────────────────────────────

    /// Stop forwarding changes made on `key` (a local node).
    pub fn ignore_element(&self, key: NodeKey) {
        self.responder.ignore_element(key);
    }

    pub fn unignore_element(&self, key: NodeKey) {
        self.responder.unignore_element(key);
    }

    /// Stop forwarding changes to attributes named `name`.
    pub fn ignore_attribute(&self, name: &str) {
        self.responder.ignore_attribute(name);
    }

    pub fn unignore_attribute(&self, name: &str) {
        self.responder.unignore_attribute(name);
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id())
            .field("role", &self.role)
            .field("host", &self.host())
            .field("connected", &self.is_connected())
            .finish()
    }
}
