//! Bidirectional network id map.

use std::collections::HashMap;

use canopy_core::NetworkId;
use canopy_model::{Model, NodeKey};

/// `NetworkId <-> NodeKey` map for one session.
///
/// On the owning side the two are the same number. On the mirroring side the
/// network id is the owner's key and the node key is the local replica.
#[derive(Debug, Default, Clone)]
pub struct NetIdMap {
    by_net: HashMap<NetworkId, NodeKey>,
    by_key: HashMap<NodeKey, NetworkId>,
}

impl NetIdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Network id an owner assigns to its own node.
    pub fn owned(key: NodeKey) -> NetworkId {
        NetworkId::new(key.get())
    }

    /// Map `net` to `key`, replacing any previous mapping of either side.
    pub fn insert(&mut self, net: NetworkId, key: NodeKey) {
        if let Some(old_key) = self.by_net.insert(net, key) {
            if old_key != key {
                self.by_key.remove(&old_key);
            }
        }
        if let Some(old_net) = self.by_key.insert(key, net) {
            if old_net != net {
                self.by_net.remove(&old_net);
            }
        }
    }

    pub fn key(&self, net: NetworkId) -> Option<NodeKey> {
        self.by_net.get(&net).copied()
    }

    pub fn net(&self, key: NodeKey) -> Option<NetworkId> {
        self.by_key.get(&key).copied()
    }

    pub fn contains_key(&self, key: NodeKey) -> bool {
        self.by_key.contains_key(&key)
    }

    pub fn remove_key(&mut self, key: NodeKey) -> Option<NetworkId> {
        let net = self.by_key.remove(&key)?;
        self.by_net.remove(&net);
        Some(net)
    }

    pub fn remove_net(&mut self, net: NetworkId) -> Option<NodeKey> {
        let key = self.by_net.remove(&net)?;
        self.by_key.remove(&key);
        Some(key)
    }

    /// Drop the mappings of `key` and every descendant still in the model.
    /// Returns the number of mappings removed.
    pub fn remove_subtree(&mut self, model: &Model, key: NodeKey) -> usize {
        model
            .subtree(key)
            .into_iter()
            .filter(|k| self.remove_key(*k).is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.by_net.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_net.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_net.clear();
        self.by_key.clear();
    }

    pub fn keys(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.by_key.keys().copied()
    }
}
