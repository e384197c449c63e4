//! Peer registry: name and host lookups.
//!
//! A peer may be registered under any number of names. Lookups by host use
//! the remote address the peer connected from, which lets a server find a
//! client again after it reconnects.
//!
//! All table mutation happens under one lock. Registry listeners and waiter
//! wake-ups run after the lock is released, so handlers may call back into
//! the registry.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};

use canopy_core::SessionId;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::lock;
use crate::peer::Peer;

/// Observer for registry changes.
pub trait RegistryListener: Send + Sync {
    fn on_register(&self, peer: &Arc<Peer>, name: &str);
    fn on_unregister(&self, peer: &Arc<Peer>, name: &str);
}

#[derive(Default)]
struct Tables {
    by_name: HashMap<String, Vec<Arc<Peer>>>,
    names: HashMap<SessionId, HashSet<String>>,
    name_waiters: HashMap<String, Vec<oneshot::Sender<Arc<Peer>>>>,
    host_waiters: HashMap<String, Vec<oneshot::Sender<Arc<Peer>>>>,
}

enum Change {
    Registered(Arc<Peer>, String),
    Unregistered(Arc<Peer>, String),
}

/// Name and host index of live peers.
#[derive(Default)]
pub struct PeerRegistry {
    tables: Mutex<Tables>,
    listeners: Mutex<Vec<Arc<dyn RegistryListener>>>,
}

impl PeerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_listener(&self, listener: Arc<dyn RegistryListener>) {
        lock(&self.listeners).push(listener);
    }

    /// Register `peer` under `name`. Returns false if it already was.
    pub fn register(&self, peer: &Arc<Peer>, name: &str) -> bool {
        let mut woken = Vec::new();
        {
            let mut tables = lock(&self.tables);
            let names = tables.names.entry(peer.id()).or_default();
            if !names.insert(name.to_string()) {
                return false;
            }
            tables
                .by_name
                .entry(name.to_string())
                .or_default()
                .push(peer.clone());

            if let Some(waiters) = tables.name_waiters.remove(name) {
                woken.extend(waiters);
            }
            if let Some(host) = peer.host() {
                if let Some(waiters) = tables.host_waiters.remove(&host) {
                    woken.extend(waiters);
                }
            }
        }

        debug!(peer = %peer.id(), name, "peer registered");
        for waiter in woken {
            let _ = waiter.send(peer.clone());
        }
        self.notify(vec![Change::Registered(peer.clone(), name.to_string())]);
        true
    }

    /// Remove `peer` from `name`. Returns false if it was not registered.
    pub fn unregister(&self, peer: &Arc<Peer>, name: &str) -> bool {
        let removed = {
            let mut tables = lock(&self.tables);
            Self::remove_locked(&mut tables, peer, name)
        };
        if removed {
            self.notify(vec![Change::Unregistered(peer.clone(), name.to_string())]);
        }
        removed
    }

    /// Remove `peer` from every name. Returns the names it had.
    pub fn unregister_all(&self, peer: &Arc<Peer>) -> Vec<String> {
        let names: Vec<String> = {
            let mut tables = lock(&self.tables);
            let names: Vec<String> = tables
                .names
                .get(&peer.id())
                .map(|n| n.iter().cloned().collect())
                .unwrap_or_default();
            for name in &names {
                Self::remove_locked(&mut tables, peer, name);
            }
            names
        };

        if !names.is_empty() {
            debug!(peer = %peer.id(), count = names.len(), "peer unregistered");
        }
        self.notify(
            names
                .iter()
                .map(|n| Change::Unregistered(peer.clone(), n.clone()))
                .collect(),
        );
        names
    }

    fn remove_locked(tables: &mut Tables, peer: &Arc<Peer>, name: &str) -> bool {
        let Some(names) = tables.names.get_mut(&peer.id()) else {
            return false;
        };
        if !names.remove(name) {
            return false;
        }
        if names.is_empty() {
            tables.names.remove(&peer.id());
        }
        if let Some(peers) = tables.by_name.get_mut(name) {
            peers.retain(|p| p.id() != peer.id());
            if peers.is_empty() {
                tables.by_name.remove(name);
            }
        }
        true
    }

    /// Peers registered under `name`, in registration order.
    pub fn lookup_by_name(&self, name: &str) -> impl Iterator<Item = Arc<Peer>> {
        lock(&self.tables)
            .by_name
            .get(name)
            .cloned()
            .unwrap_or_default()
            .into_iter()
    }

    /// Names `peer` is registered under.
    pub fn names_of(&self, peer: &Peer) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.tables)
            .names
            .get(&peer.id())
            .map(|n| n.iter().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Whether `peer` is registered under any name.
    pub fn is_registered(&self, peer: &Peer) -> bool {
        lock(&self.tables).names.contains_key(&peer.id())
    }

    /// Number of distinct registered peers.
    pub fn len(&self) -> usize {
        lock(&self.tables).names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve with the first peer registered under `name`, now or later.
    pub fn await_registration(&self, name: &str) -> impl Future<Output = Result<Arc<Peer>>> {
        let rx = {
            let mut tables = lock(&self.tables);
            let existing = tables.by_name.get(name).and_then(|p| p.first()).cloned();
            match existing {
                Some(peer) => Err(peer),
                None => {
                    let (tx, rx) = oneshot::channel();
                    tables
                        .name_waiters
                        .entry(name.to_string())
                        .or_default()
                        .push(tx);
                    Ok(rx)
                }
            }
        };
        async move {
            match rx {
                Err(peer) => Ok(peer),
                Ok(rx) => rx.await.map_err(|_| SyncError::Cancelled),
            }
        }
    }

    /// Resolve with a registered peer connected from `host`, now or when the
    /// next one registers.
    pub fn lookup_by_host(&self, host: &str) -> impl Future<Output = Result<Arc<Peer>>> {
        let rx = {
            let mut tables = lock(&self.tables);
            let existing = tables
                .by_name
                .values()
                .flatten()
                .find(|p| p.host().as_deref() == Some(host))
                .cloned();
            match existing {
                Some(peer) => Err(peer),
                None => {
                    let (tx, rx) = oneshot::channel();
                    tables
                        .host_waiters
                        .entry(host.to_string())
                        .or_default()
                        .push(tx);
                    Ok(rx)
                }
            }
        };
        async move {
            match rx {
                Err(peer) => Ok(peer),
                Ok(rx) => rx.await.map_err(|_| SyncError::Cancelled),
            }
        }
    }

    /// Every registered peer, each once.
    pub fn peers(&self) -> Vec<Arc<Peer>> {
        let tables = lock(&self.tables);
        let mut seen = HashSet::new();
        tables
            .by_name
            .values()
            .flatten()
            .filter(|p| seen.insert(p.id()))
            .cloned()
            .collect()
    }

    fn notify(&self, changes: Vec<Change>) {
        if changes.is_empty() {
            return;
        }
        let listeners = lock(&self.listeners).clone();
        for change in &changes {
            for listener in &listeners {
                match change {
                    Change::Registered(peer, name) => listener.on_register(peer, name),
                    Change::Unregistered(peer, name) => listener.on_unregister(peer, name),
                }
            }
        }
    }
}

impl std::fmt::Debug for PeerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerRegistry")
            .field("peers", &self.len())
            .finish()
    }
}
