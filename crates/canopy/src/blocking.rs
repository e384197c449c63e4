//! Synchronous adapter.
//!
//! [`BlockingClient`] owns a tokio runtime and blocks the calling thread on
//! each request. It is meant for callers with no async runtime of their
//! own; calling it from inside a runtime panics, as with any
//! `Runtime::block_on`.

use std::sync::Arc;
use std::time::Duration;

use canopy_core::WireValue;
use canopy_model::{Model, NodeKey, Scope, Value};
use canopy_sync::Peer;
use tokio::runtime::Runtime;

use crate::config::CanopyConfig;
use crate::endpoint::Client;
use crate::error::Result;

/// A connected client whose operations block.
pub struct BlockingClient {
    client: Client,
    peer: Arc<Peer>,
    // Declared last so tasks are torn down after the handles above.
    runtime: Runtime,
}

impl BlockingClient {
    /// Dial `addr` with an empty local tree.
    pub fn connect(addr: &str, config: &CanopyConfig) -> Result<Self> {
        Self::connect_with_model(addr, Model::new(), config)
    }

    /// Dial `addr`, mirroring into `model`.
    pub fn connect_with_model(addr: &str, model: Model, config: &CanopyConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("canopy-blocking")
            .enable_all()
            .build()?;
        let client = {
            let _guard = runtime.enter();
            Client::new(model, config)
        };
        let peer = runtime.block_on(client.connect(addr))?;
        Ok(Self {
            client,
            peer,
            runtime,
        })
    }

    pub fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Bind `query` with the configured limit and timeout.
    pub fn bind(&self, query: &str) -> Result<Vec<NodeKey>> {
        Ok(self.runtime.block_on(self.peer.bind(query))?)
    }

    pub fn bind_with(&self, query: &str, limit: u32, timeout: Duration) -> Result<Vec<NodeKey>> {
        Ok(self
            .runtime
            .block_on(self.peer.bind_with(query, limit, timeout))?)
    }

    /// Expand a mirrored stub.
    pub fn sync(&self, stub: NodeKey) -> Result<NodeKey> {
        Ok(self.runtime.block_on(self.peer.sync(stub))?)
    }

    pub fn unbind(&self, root: NodeKey) -> Result<()> {
        Ok(self.runtime.block_on(self.peer.unbind(root))?)
    }

    pub fn query(&self, query: &str) -> Result<WireValue> {
        Ok(self.runtime.block_on(self.peer.query(query))?)
    }

    /// Run the local `script` node remotely; see [`Peer::execute`].
    pub fn execute(&self, scope: &mut Scope, names: &[&str], script: NodeKey) -> Result<Vec<Value>> {
        Ok(self
            .runtime
            .block_on(self.peer.execute(scope, names, script))?)
    }

    /// Run `job` against the local tree.
    pub fn with_model<F, R>(&self, job: F) -> Result<R>
    where
        F: FnOnce(&mut Model) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.runtime.block_on(self.client.with_model(job))
    }

    /// Close the connection and wait until it is gone.
    pub fn close(self) {
        self.peer.close();
        self.runtime.block_on(self.peer.closed());
    }
}

impl std::fmt::Debug for BlockingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingClient")
            .field("peer", &self.peer.id())
            .field("connected", &self.peer.is_connected())
            .finish()
    }
}
