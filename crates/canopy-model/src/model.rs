//! The arena-backed tree.
//!
//! The model is not thread-safe by itself. It is meant to be owned by a
//! single serial executor; every mutation, local or protocol-driven, runs
//! there and is therefore linearized.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use canopy_core::Fragment;

use crate::error::{ModelError, Result};
use crate::listener::{ModelEvent, ModelListener, SubscriberId};
use crate::node::{CachingPolicy, Node, NodeKey};

/// Type name of the implicit document root.
pub const DOCUMENT_TYPE: &str = "#document";

/// An arena of nodes plus the subscription table.
pub struct Model {
    /// Live nodes by key.
    nodes: HashMap<NodeKey, Node>,

    /// Next key to hand out. Keys are never reused.
    next_key: u64,

    /// The document root; always present and never detached.
    root: NodeKey,

    /// Node -> subscribers, in subscription order.
    subscriptions: HashMap<NodeKey, Vec<SubscriberId>>,

    /// Registered handler objects.
    listeners: HashMap<SubscriberId, Arc<dyn ModelListener>>,

    /// Next subscriber token.
    next_subscriber: u64,

    /// Queued notifications, delivered by `flush`.
    pending: VecDeque<(SubscriberId, ModelEvent)>,

    /// Detached subtrees to free at the end of the next flush.
    reclaim: Vec<NodeKey>,
}

impl Model {
    /// Create a model containing only the document root.
    pub fn new() -> Self {
        let root = NodeKey(1);
        let mut nodes = HashMap::new();
        nodes.insert(root, Node::new(DOCUMENT_TYPE));
        Self {
            nodes,
            next_key: 2,
            root,
            subscriptions: HashMap::new(),
            listeners: HashMap::new(),
            next_subscriber: 1,
            pending: VecDeque::new(),
            reclaim: Vec::new(),
        }
    }

    /// The document root.
    pub fn root(&self) -> NodeKey {
        self.root
    }

    /// Number of live nodes, including the root and detached nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A model always holds its root.
    pub fn is_empty(&self) -> bool {
        false
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Read access
    // ─────────────────────────────────────────────────────────────────────────

    fn node(&self, key: NodeKey) -> Result<&Node> {
        self.nodes.get(&key).ok_or(ModelError::UnknownNode(key))
    }

    fn node_mut(&mut self, key: NodeKey) -> Result<&mut Node> {
        self.nodes.get_mut(&key).ok_or(ModelError::UnknownNode(key))
    }

    /// Whether `key` names a live node.
    pub fn contains(&self, key: NodeKey) -> bool {
        self.nodes.contains_key(&key)
    }

    /// Type name of a node.
    pub fn type_name(&self, key: NodeKey) -> Option<&str> {
        self.nodes.get(&key).map(|n| n.type_name.as_str())
    }

    /// Attribute value.
    pub fn attribute(&self, key: NodeKey, name: &str) -> Option<&str> {
        self.nodes.get(&key).and_then(|n| n.attribute(name))
    }

    /// All attributes in insertion order.
    pub fn attributes(&self, key: NodeKey) -> &[(String, String)] {
        self.nodes
            .get(&key)
            .map(|n| n.attributes.as_slice())
            .unwrap_or(&[])
    }

    /// Children in document order.
    pub fn children(&self, key: NodeKey) -> &[NodeKey] {
        self.nodes
            .get(&key)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Parent, if attached.
    pub fn parent(&self, key: NodeKey) -> Option<NodeKey> {
        self.nodes.get(&key).and_then(|n| n.parent)
    }

    /// Position of `key` among its parent's children.
    pub fn index_of(&self, key: NodeKey) -> Option<usize> {
        let parent = self.parent(key)?;
        self.children(parent).iter().position(|c| *c == key)
    }

    /// Caching policy attached to a node.
    pub fn policy(&self, key: NodeKey) -> Option<&CachingPolicy> {
        self.nodes.get(&key).and_then(|n| n.policy.as_ref())
    }

    /// Whether the node's content is not loaded.
    pub fn is_dirty(&self, key: NodeKey) -> bool {
        self.nodes.get(&key).map(|n| n.dirty).unwrap_or(false)
    }

    /// Whether the node is a placeholder whose children live elsewhere.
    pub fn is_stub(&self, key: NodeKey) -> bool {
        self.nodes.get(&key).map(|n| n.stub).unwrap_or(false)
    }

    /// Whether `ancestor` is `key` or one of its ancestors.
    pub fn is_ancestor_or_self(&self, ancestor: NodeKey, key: NodeKey) -> bool {
        let mut cursor = Some(key);
        while let Some(k) = cursor {
            if k == ancestor {
                return true;
            }
            cursor = self.parent(k);
        }
        false
    }

    /// The node and all descendants, breadth-first.
    pub fn subtree(&self, key: NodeKey) -> Vec<NodeKey> {
        if !self.contains(key) {
            return Vec::new();
        }
        let mut out = vec![key];
        let mut i = 0;
        while i < out.len() {
            out.extend_from_slice(self.children(out[i]));
            i += 1;
        }
        out
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutation
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a detached node.
    pub fn create_node(&mut self, type_name: impl Into<String>) -> NodeKey {
        let key = NodeKey(self.next_key);
        self.next_key += 1;
        self.nodes.insert(key, Node::new(type_name));
        key
    }

    /// Insert a detached `child` under `parent`.
    ///
    /// `index` is clamped to the child count; `None` appends. Returns the
    /// actual index.
    pub fn add_child(
        &mut self,
        parent: NodeKey,
        child: NodeKey,
        index: Option<usize>,
    ) -> Result<usize> {
        self.node(parent)?;
        if self.node(child)?.parent.is_some() {
            return Err(ModelError::AlreadyAttached(child));
        }
        if child == self.root {
            return Err(ModelError::RootDetach);
        }
        if self.is_ancestor_or_self(child, parent) {
            return Err(ModelError::Cycle { parent, child });
        }

        let parent_node = self.node_mut(parent)?;
        let index = index
            .unwrap_or(parent_node.children.len())
            .min(parent_node.children.len());
        parent_node.children.insert(index, child);
        self.node_mut(child)?.parent = Some(parent);

        self.emit(
            parent,
            ModelEvent::ChildAdded {
                parent,
                child,
                index,
            },
        );
        Ok(index)
    }

    /// Detach `child` from `parent`. Returns the former index, or `None` if
    /// `child` was not a child of `parent`. The subtree stays in the arena.
    pub fn remove_child(&mut self, parent: NodeKey, child: NodeKey) -> Result<Option<usize>> {
        let parent_node = self.node_mut(parent)?;
        let Some(index) = parent_node.children.iter().position(|c| *c == child) else {
            return Ok(None);
        };
        parent_node.children.remove(index);
        self.node_mut(child)?.parent = None;

        self.emit(
            parent,
            ModelEvent::ChildRemoved {
                parent,
                child,
                index,
            },
        );
        Ok(Some(index))
    }

    /// Detach a node from its parent, if it has one.
    pub fn detach(&mut self, key: NodeKey) -> Result<()> {
        if key == self.root {
            return Err(ModelError::RootDetach);
        }
        if let Some(parent) = self.node(key)?.parent {
            self.remove_child(parent, key)?;
        }
        Ok(())
    }

    /// Detach a subtree and free it at the end of the next flush.
    pub fn delete(&mut self, key: NodeKey) -> Result<()> {
        self.detach(key)?;
        self.reclaim.push(key);
        Ok(())
    }

    /// Set an attribute. Returns the previous value.
    ///
    /// Setting the current value again raises no event.
    pub fn set_attribute(
        &mut self,
        key: NodeKey,
        name: &str,
        value: impl Into<String>,
    ) -> Result<Option<String>> {
        let value = value.into();
        let node = self.node_mut(key)?;
        let old = match node.attributes.iter_mut().find(|(n, _)| n == name) {
            Some((_, current)) if *current == value => return Ok(Some(value)),
            Some((_, current)) => Some(std::mem::replace(current, value.clone())),
            None => {
                node.attributes.push((name.to_string(), value.clone()));
                None
            }
        };

        self.emit(
            key,
            ModelEvent::AttributeChanged {
                node: key,
                name: name.to_string(),
                value,
                old: old.clone(),
            },
        );
        Ok(old)
    }

    /// Remove an attribute. Returns the removed value.
    pub fn clear_attribute(&mut self, key: NodeKey, name: &str) -> Result<Option<String>> {
        let node = self.node_mut(key)?;
        let Some(pos) = node.attributes.iter().position(|(n, _)| n == name) else {
            return Ok(None);
        };
        let (_, old) = node.attributes.remove(pos);

        self.emit(
            key,
            ModelEvent::AttributeCleared {
                node: key,
                name: name.to_string(),
                old: old.clone(),
            },
        );
        Ok(Some(old))
    }

    /// Attach or remove a caching policy.
    pub fn set_policy(&mut self, key: NodeKey, policy: Option<CachingPolicy>) -> Result<()> {
        self.node_mut(key)?.policy = policy;
        Ok(())
    }

    /// Change the dirty flag. Returns whether it changed.
    ///
    /// Becoming dirty drops the node's children without per-child events;
    /// the dropped keys travel in the [`ModelEvent::DirtyChanged`] event and
    /// are freed when the flush ends.
    pub fn set_dirty(&mut self, key: NodeKey, dirty: bool) -> Result<bool> {
        let node = self.node_mut(key)?;
        if node.dirty == dirty {
            return Ok(false);
        }
        node.dirty = dirty;

        let dropped = if dirty {
            std::mem::take(&mut node.children)
        } else {
            Vec::new()
        };
        for child in &dropped {
            if let Some(n) = self.nodes.get_mut(child) {
                n.parent = None;
            }
        }
        self.reclaim.extend_from_slice(&dropped);

        self.emit(
            key,
            ModelEvent::DirtyChanged {
                node: key,
                dirty,
                dropped,
            },
        );
        Ok(true)
    }

    /// Mark or unmark a node as a stub placeholder.
    pub fn set_stub(&mut self, key: NodeKey, stub: bool) -> Result<()> {
        self.node_mut(key)?.stub = stub;
        Ok(())
    }

    /// Remove all children without raising events, freeing them at the end
    /// of the next flush. Used when replacing a mirrored subtree wholesale.
    pub fn clear_children_quietly(&mut self, key: NodeKey) -> Result<Vec<NodeKey>> {
        let children = std::mem::take(&mut self.node_mut(key)?.children);
        for child in &children {
            if let Some(n) = self.nodes.get_mut(child) {
                n.parent = None;
            }
        }
        self.reclaim.extend_from_slice(&children);
        Ok(children)
    }

    /// Replace all attributes without raising events.
    pub fn replace_attributes_quietly(
        &mut self,
        key: NodeKey,
        attributes: Vec<(String, String)>,
    ) -> Result<()> {
        self.node_mut(key)?.attributes = attributes;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Fragments
    // ─────────────────────────────────────────────────────────────────────────

    /// Deep copy of a subtree, without network ids and without stubbing.
    pub fn to_fragment(&self, key: NodeKey) -> Result<Fragment> {
        let node = self.node(key)?;
        let mut children = Vec::with_capacity(node.children.len());
        for child in &node.children {
            children.push(self.to_fragment(*child)?);
        }
        Ok(Fragment {
            net_id: None,
            type_name: node.type_name.clone(),
            attributes: node.attributes.clone(),
            children,
            stub: node.stub,
            dirty: node.dirty,
        })
    }

    /// Create a detached subtree from a fragment. Returns the new root.
    ///
    /// Stub and dirty flags are carried over; network ids are ignored.
    pub fn instantiate(&mut self, fragment: &Fragment) -> NodeKey {
        let key = self.create_node(fragment.type_name.clone());
        if let Some(node) = self.nodes.get_mut(&key) {
            node.attributes = fragment.attributes.clone();
            node.stub = fragment.stub;
            node.dirty = fragment.dirty;
        }
        for child in &fragment.children {
            let child_key = self.instantiate(child);
            if let Some(node) = self.nodes.get_mut(&child_key) {
                node.parent = Some(key);
            }
            if let Some(node) = self.nodes.get_mut(&key) {
                node.children.push(child_key);
            }
        }
        key
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Subscriptions
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a handler object. Returns its token.
    pub fn add_listener(&mut self, listener: Arc<dyn ModelListener>) -> SubscriberId {
        let id = SubscriberId(self.next_subscriber);
        self.next_subscriber += 1;
        self.listeners.insert(id, listener);
        id
    }

    /// Unregister a handler and drop all of its subscriptions.
    ///
    /// Notifications already queued for it are discarded.
    pub fn remove_listener(&mut self, id: SubscriberId) {
        self.listeners.remove(&id);
        self.subscriptions.retain(|_, subs| {
            subs.retain(|s| *s != id);
            !subs.is_empty()
        });
        self.pending.retain(|(s, _)| *s != id);
    }

    /// Attach a subscriber to a node. Returns false if already attached.
    pub fn subscribe(&mut self, key: NodeKey, subscriber: SubscriberId) -> bool {
        if !self.contains(key) {
            return false;
        }
        let subs = self.subscriptions.entry(key).or_default();
        if subs.contains(&subscriber) {
            return false;
        }
        subs.push(subscriber);
        true
    }

    /// Detach a subscriber from a node. Returns false if it was not attached.
    pub fn unsubscribe(&mut self, key: NodeKey, subscriber: SubscriberId) -> bool {
        let Some(subs) = self.subscriptions.get_mut(&key) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|s| *s != subscriber);
        let removed = subs.len() != before;
        if subs.is_empty() {
            self.subscriptions.remove(&key);
        }
        removed
    }

    /// Whether the subscriber is attached to the node.
    pub fn is_subscribed(&self, key: NodeKey, subscriber: SubscriberId) -> bool {
        self.subscriptions
            .get(&key)
            .map(|subs| subs.contains(&subscriber))
            .unwrap_or(false)
    }

    /// Number of nodes the subscriber is attached to.
    pub fn subscription_count(&self, subscriber: SubscriberId) -> usize {
        self.subscriptions
            .values()
            .filter(|subs| subs.contains(&subscriber))
            .count()
    }

    /// Queue an event for every subscriber of `key`.
    fn emit(&mut self, key: NodeKey, event: ModelEvent) {
        if let Some(subs) = self.subscriptions.get(&key) {
            for sub in subs {
                self.pending.push_back((*sub, event.clone()));
            }
        }
    }

    /// Number of queued notifications.
    pub fn pending_notifications(&self) -> usize {
        self.pending.len()
    }

    /// Deliver queued notifications in order, then free reclaimed subtrees.
    ///
    /// Returns the number of notifications delivered.
    pub fn flush(&mut self) -> usize {
        let mut delivered = 0;
        while let Some((subscriber, event)) = self.pending.pop_front() {
            let Some(listener) = self.listeners.get(&subscriber).cloned() else {
                continue;
            };
            listener.notify(self, subscriber, &event);
            delivered += 1;
        }
        self.reclaim_detached();
        delivered
    }

    fn reclaim_detached(&mut self) {
        for key in std::mem::take(&mut self.reclaim) {
            // Re-attached meanwhile: keep it.
            if self.parent(key).is_some() || key == self.root {
                continue;
            }
            for k in self.subtree(key) {
                self.nodes.remove(&k);
                self.subscriptions.remove(&k);
            }
        }
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("nodes", &self.nodes.len())
            .field("listeners", &self.listeners.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}
