//! Server and client entry points.
//!
//! Each endpoint owns one [`Dispatcher`], and with it one tree. A server
//! shares its tree with every accepted peer; a client mirrors into its own
//! tree whatever its peers bind.

use std::net::SocketAddr;
use std::sync::Arc;

use canopy_model::{Model, ScriptEngine};
use canopy_sync::{Connector, Dispatcher, Peer, PeerRegistry, RetryConfig, SessionConfig};
use tracing::info;

use crate::config::CanopyConfig;
use crate::error::Result;

/// A listening endpoint serving its tree.
pub struct Server {
    inner: canopy_sync::Server,
    dispatcher: Dispatcher,
}

impl Server {
    /// Serve `model` on `config.bind_addr` with the bundled script engine.
    pub async fn start(model: Model, config: &CanopyConfig) -> Result<Self> {
        Self::start_with_dispatcher(Dispatcher::spawn(model), config).await
    }

    /// Serve `model`, running remote executions with `engine`.
    pub async fn start_with_engine(
        model: Model,
        engine: Arc<dyn ScriptEngine>,
        config: &CanopyConfig,
    ) -> Result<Self> {
        Self::start_with_dispatcher(Dispatcher::with_engine(model, engine), config).await
    }

    /// Serve the tree owned by an existing dispatcher.
    pub async fn start_with_dispatcher(dispatcher: Dispatcher, config: &CanopyConfig) -> Result<Self> {
        let inner =
            canopy_sync::Server::bind(&config.bind_addr, dispatcher.clone(), config.session.clone())
                .await?;
        info!(addr = %inner.local_addr(), "canopy server started");
        Ok(Self { inner, dispatcher })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        self.inner.registry()
    }

    /// Every connected peer.
    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.inner.peers()
    }

    /// Next newly accepted peer.
    pub async fn accept(&self) -> Option<Arc<Peer>> {
        self.inner.accept().await
    }

    /// Wait for `peer`'s client to come back and reattach it.
    pub async fn reconnect(&self, peer: &Arc<Peer>) -> Result<()> {
        Ok(self.inner.reconnect(peer).await?)
    }

    /// Run `job` against the served tree. Changes reach bound peers once the
    /// job returns.
    pub async fn with_model<F, R>(&self, job: F) -> Result<R>
    where
        F: FnOnce(&mut Model) -> R + Send + 'static,
        R: Send + 'static,
    {
        Ok(self.dispatcher.with_model(job).await?)
    }

    /// Stop accepting and close every connection.
    pub fn shutdown(&self) {
        info!(addr = %self.local_addr(), "canopy server stopping");
        self.inner.shutdown();
    }

    /// The underlying sync server.
    pub fn inner(&self) -> &canopy_sync::Server {
        &self.inner
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr())
            .field("peers", &self.registry().len())
            .finish()
    }
}

/// A dialing endpoint with its own tree.
pub struct Client {
    connector: Connector,
    dispatcher: Dispatcher,
    retry: RetryConfig,
}

impl Client {
    /// Create a client around `model`. Must be called within a tokio runtime.
    pub fn new(model: Model, config: &CanopyConfig) -> Self {
        Self::with_dispatcher(Dispatcher::spawn(model), config)
    }

    pub fn with_dispatcher(dispatcher: Dispatcher, config: &CanopyConfig) -> Self {
        Self {
            connector: Connector::new(dispatcher.clone(), config.session.clone()),
            dispatcher,
            retry: config.retry.clone(),
        }
    }

    /// Dial `addr` on the configured retry schedule.
    pub async fn connect(&self, addr: &str) -> Result<Arc<Peer>> {
        Ok(self
            .connector
            .connect_with_retry(addr, self.retry.clone())
            .await?)
    }

    /// Dial `addr` once.
    pub async fn connect_once(&self, addr: &str) -> Result<Arc<Peer>> {
        Ok(self.connector.connect(addr).await?)
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        self.connector.registry()
    }

    pub fn session_config(&self) -> &SessionConfig {
        self.connector.config()
    }

    /// Run `job` against the local tree, where mirrors live.
    pub async fn with_model<F, R>(&self, job: F) -> Result<R>
    where
        F: FnOnce(&mut Model) -> R + Send + 'static,
        R: Send + 'static,
    {
        Ok(self.dispatcher.with_model(job).await?)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("retry", &self.retry)
            .field("peers", &self.registry().len())
            .finish()
    }
}
