//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: small tree builders and
//! connected endpoints over loopback TCP or in-memory duplex streams.

use std::sync::Arc;
use std::time::Duration;

use canopy_core::Fragment;
use canopy_model::{Model, NodeKey};
use canopy_sync::{Connector, Dispatcher, Peer, RetryConfig, Role, Server, SessionConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Request timeout used by fixtures.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Trees
// ─────────────────────────────────────────────────────────────────────────────

/// Create a node with attributes and append it to `parent`.
pub fn node(model: &mut Model, parent: NodeKey, type_name: &str, attrs: &[(&str, &str)]) -> NodeKey {
    let key = model.create_node(type_name);
    for (name, value) in attrs {
        model
            .set_attribute(key, name, *value)
            .expect("fresh node accepts attributes");
    }
    model
        .add_child(parent, key, None)
        .expect("fresh node has no parent");
    key
}

/// Instantiate `fragment` and append it to `parent`.
pub fn attach_tree(model: &mut Model, parent: NodeKey, fragment: &Fragment) -> NodeKey {
    let key = model.instantiate(fragment);
    model
        .add_child(parent, key, None)
        .expect("instantiated tree is detached");
    key
}

/// `/config` with 50 descendants: 4 groups, 2 sections per group, and
/// 38 leaves spread over the sections.
///
/// Binding it with limit 5 sends `config` and the 4 groups expanded and
/// the 8 sections as stubs.
pub fn wide_config(model: &mut Model) -> NodeKey {
    let root = model.root();
    let config = node(model, root, "config", &[("name", "wide")]);
    let leaves = [5, 5, 5, 5, 5, 5, 4, 4];
    let mut section_index = 0;
    for g in 0..4 {
        let id = g.to_string();
        let group = node(model, config, "group", &[("id", &id)]);
        for s in 0..2 {
            let id = s.to_string();
            let section = node(model, group, "section", &[("id", &id)]);
            for l in 0..leaves[section_index] {
                let value = l.to_string();
                node(model, section, "leaf", &[("value", &value)]);
            }
            section_index += 1;
        }
    }
    config
}

/// A reproducible random tree of `size` nodes under a `random` root.
pub fn random_tree(model: &mut Model, parent: NodeKey, seed: u64, size: usize) -> NodeKey {
    const TYPES: [&str; 4] = ["item", "group", "entry", "leaf"];
    let mut rng = StdRng::seed_from_u64(seed);
    let root = node(model, parent, "random", &[]);
    let mut nodes = vec![root];
    for i in 1..size {
        let under = nodes[rng.gen_range(0..nodes.len())];
        let type_name = TYPES[rng.gen_range(0..TYPES.len())];
        let value = rng.gen_range(0..1000u32).to_string();
        let index = i.to_string();
        nodes.push(node(model, under, type_name, &[("n", &index), ("v", &value)]));
    }
    root
}

// ─────────────────────────────────────────────────────────────────────────────
// Endpoints
// ─────────────────────────────────────────────────────────────────────────────

/// A server on `127.0.0.1:0` serving a prepared tree.
pub struct Loopback {
    pub server: Server,
    pub dispatcher: Dispatcher,
    pub config: SessionConfig,
}

impl Loopback {
    /// Serve a tree prepared by `build` with the default session config.
    pub async fn start(build: impl FnOnce(&mut Model)) -> Self {
        Self::start_with(SessionConfig::default(), build).await
    }

    pub async fn start_with(config: SessionConfig, build: impl FnOnce(&mut Model)) -> Self {
        let mut model = Model::new();
        build(&mut model);
        model.flush();
        let dispatcher = Dispatcher::spawn(model);
        let server = Server::bind("127.0.0.1:0", dispatcher.clone(), config.clone())
            .await
            .expect("loopback listener");
        Self {
            server,
            dispatcher,
            config,
        }
    }

    pub fn addr(&self) -> String {
        self.server.local_addr().to_string()
    }

    pub fn timeout(&self) -> Duration {
        TEST_TIMEOUT
    }

    /// Connect a new client with an empty tree.
    pub async fn client(&self) -> (Dispatcher, Arc<Peer>) {
        self.client_with(self.config.clone()).await
    }

    pub async fn client_with(&self, config: SessionConfig) -> (Dispatcher, Arc<Peer>) {
        let dispatcher = Dispatcher::spawn(Model::new());
        let peer = Connector::new(dispatcher.clone(), config)
            .connect_with_retry(&self.addr(), RetryConfig::new(3, [50]))
            .await
            .expect("loopback connect");
        (dispatcher, peer)
    }

    /// Run `job` on the served tree.
    pub async fn with_model<F, R>(&self, job: F) -> R
    where
        F: FnOnce(&mut Model) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.dispatcher
            .with_model(job)
            .await
            .expect("server dispatcher running")
    }
}

/// Two peers joined by an in-memory stream, each with its own dispatcher.
///
/// Returns `(server_side, client_side)`.
pub fn duplex_pair(
    server: &Dispatcher,
    client: &Dispatcher,
    config: SessionConfig,
) -> (Arc<Peer>, Arc<Peer>) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let server_peer = Peer::new(Role::Server, config.clone(), server.clone(), None);
    let client_peer = Peer::new(Role::Client, config, client.clone(), None);
    server_peer.attach(a);
    client_peer.attach(b);
    (server_peer, client_peer)
}

/// Poll `check` on the dispatcher's tree until it holds or `timeout`
/// passes. Returns whether it held.
pub async fn eventually<F>(dispatcher: &Dispatcher, timeout: Duration, check: F) -> bool
where
    F: Fn(&Model) -> bool + Clone + Send + 'static,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let predicate = check.clone();
        if let Ok(true) = dispatcher.with_model(move |model| predicate(model)).await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_config_shape() {
        let mut model = Model::new();
        let config = wide_config(&mut model);
        assert_eq!(model.subtree(config).len(), 51);
        assert_eq!(model.children(config).len(), 4);
        assert_eq!(model.parent(config), Some(model.root()));
    }

    #[test]
    fn test_random_tree_is_reproducible() {
        let mut a = Model::new();
        let mut b = Model::new();
        let (a_root, b_root) = (a.root(), b.root());
        let ra = random_tree(&mut a, a_root, 7, 40);
        let rb = random_tree(&mut b, b_root, 7, 40);
        assert_eq!(a.subtree(ra).len(), 40);
        assert_eq!(a.to_fragment(ra).unwrap(), b.to_fragment(rb).unwrap());
    }

    #[tokio::test]
    async fn test_duplex_pair_binds() {
        let mut model = Model::new();
        wide_config(&mut model);
        let server = Dispatcher::spawn(model);
        let client = Dispatcher::spawn(Model::new());
        let (_server_peer, client_peer) = duplex_pair(&server, &client, SessionConfig::default());

        let roots = client_peer.bind_with("/config", 5, TEST_TIMEOUT).await.unwrap();
        assert_eq!(roots.len(), 1);
        let root = roots[0];
        assert!(eventually(&client, TEST_TIMEOUT, move |m| m.children(root).len() == 4).await);
    }
}
