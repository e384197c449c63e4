//! Owner-side state of one session: what the peer has bound, and the
//! listener that turns model events into update messages.
//!
//! The responder keeps a shadow of the peer's copy: for every node the peer
//! holds, its parent and (unless it is a stub) its children as the peer has
//! them. Events are delivered at flush time, after the whole job ran, so a
//! structural event is not replayed; the parent's current children are
//! compared with the shadow and the difference is sent.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use canopy_core::{Message, NetworkId};
use canopy_model::{Model, ModelEvent, ModelListener, NodeKey, SubscriberId};
use tracing::{debug, trace};

use crate::connection::LinkSlot;
use crate::error::{Result, SyncError};
use crate::lock;
use crate::netid::NetIdMap;
use crate::replicate::{replicate, Replica};

/// One node of the peer's copy.
#[derive(Debug, Clone, Default)]
struct Held {
    /// Held parent, `None` for a bind root.
    parent: Option<NodeKey>,
    /// Children in the peer's order; `None` for a stub.
    children: Option<Vec<NodeKey>>,
}

#[derive(Debug, Default)]
pub(crate) struct ResponderState {
    subscriber: Option<SubscriberId>,
    held: HashMap<NodeKey, Held>,
    /// Bind roots and how many binds hold each.
    roots: HashMap<NodeKey, u32>,
    /// Stubs being synced; their own attribute events are not forwarded
    /// until the sync's flush is over.
    syncing: HashSet<NodeKey>,
    ignored_elements: HashSet<NodeKey>,
    ignored_attributes: HashSet<String>,
}

impl ResponderState {
    /// Record the nodes of `replica` as held. `parent` is the held parent of
    /// replica roots the peer does not already hold.
    fn install(
        &mut self,
        model: &mut Model,
        replica: &Replica,
        parent: Option<NodeKey>,
        subscriber: SubscriberId,
    ) {
        let included: HashSet<NodeKey> = replica.included.iter().map(|(k, _)| *k).collect();

        for (key, _) in &replica.included {
            let stale: Vec<NodeKey> = match self.held.get(key) {
                Some(Held {
                    children: Some(children),
                    ..
                }) => children.iter().copied().filter(|c| !included.contains(c)).collect(),
                _ => continue,
            };
            for child in stale {
                self.drop_subtree(model, child, &included);
            }
        }

        for (key, shape) in &replica.included {
            let previous = self.held.get(key).and_then(|held| held.parent);
            let new_parent = model
                .parent(*key)
                .filter(|p| included.contains(p))
                .or(previous)
                .or(parent);
            if let Some(old) = previous.filter(|old| Some(*old) != new_parent) {
                self.unlink(old, *key);
            }
            let children = shape.is_expanded().then(|| {
                model
                    .children(*key)
                    .iter()
                    .copied()
                    .filter(|c| included.contains(c))
                    .collect()
            });
            self.held.insert(
                *key,
                Held {
                    parent: new_parent,
                    children,
                },
            );
            model.subscribe(*key, subscriber);
        }
    }

    /// Remove `child` from the held child list of `parent`.
    fn unlink(&mut self, parent: NodeKey, child: NodeKey) {
        if let Some(Held {
            children: Some(children),
            ..
        }) = self.held.get_mut(&parent)
        {
            children.retain(|c| *c != child);
        }
    }

    /// Stop holding `key` and everything the peer holds below it.
    fn release(&mut self, model: &mut Model, key: NodeKey) {
        let Some(parent) = self.held.get(&key).map(|held| held.parent) else {
            return;
        };
        if let Some(parent) = parent {
            self.unlink(parent, key);
        }
        self.drop_subtree(model, key, &HashSet::new());
    }

    fn drop_subtree(&mut self, model: &mut Model, key: NodeKey, keep: &HashSet<NodeKey>) {
        let mut stack = vec![key];
        while let Some(k) = stack.pop() {
            if keep.contains(&k) {
                continue;
            }
            let Some(held) = self.held.remove(&k) else {
                continue;
            };
            if let Some(subscriber) = self.subscriber {
                model.unsubscribe(k, subscriber);
            }
            self.roots.remove(&k);
            stack.extend(held.children.into_iter().flatten());
        }
    }

    /// Bring the peer's children of `parent` in line with the model.
    ///
    /// Held children that left, or that are out of order, are removed; the
    /// model's other children are then sent at their final index. Nodes the
    /// peer holds elsewhere that reappear inside a sent subtree are removed
    /// first, so one network id never names two copies.
    fn reconcile(
        &mut self,
        model: &mut Model,
        parent: NodeKey,
        limit: usize,
        subscriber: SubscriberId,
    ) -> Vec<Message> {
        let mut messages = Vec::new();
        let Some(Held {
            children: Some(held),
            ..
        }) = self.held.get(&parent).cloned()
        else {
            return messages;
        };
        let current = model.children(parent).to_vec();

        let mut children = Vec::with_capacity(current.len());
        let mut next = 0;
        for child in held {
            match current[next..].iter().position(|c| *c == child) {
                Some(offset) => {
                    next += offset + 1;
                    children.push(child);
                }
                None => {
                    messages.push(Message::RemoveChild {
                        child: NetIdMap::owned(child),
                    });
                    self.release(model, child);
                }
            }
        }

        for (index, child) in current.iter().copied().enumerate() {
            if children.get(index) == Some(&child) {
                continue;
            }
            let replica = replicate(model, &[child], limit, true);
            for (key, _) in &replica.included {
                if self.held.contains_key(key) {
                    messages.push(Message::RemoveChild {
                        child: NetIdMap::owned(*key),
                    });
                    self.release(model, *key);
                }
            }
            // Held only inside a subtree that just moved below this child.
            if !self.held.contains_key(&parent) {
                return messages;
            }
            self.install(model, &replica, Some(parent), subscriber);
            if let Some(fragment) = replica.fragments.into_iter().next() {
                messages.push(Message::AddChild {
                    parent: NetIdMap::owned(parent),
                    index: index as u32,
                    child: fragment,
                });
            }
            children.insert(index, child);
        }

        if let Some(held) = self.held.get_mut(&parent) {
            held.children = Some(children);
        }
        messages
    }

    /// `node` became dirty: the peer drops its children.
    fn collapse(&mut self, model: &mut Model, node: NodeKey) {
        let children = self
            .held
            .get_mut(&node)
            .and_then(|held| held.children.take())
            .unwrap_or_default();
        for child in children {
            self.drop_subtree(model, child, &HashSet::new());
        }
    }
}

/// Update-propagation listener for one session.
///
/// Registered with the model once per connection; subscribed to every node
/// the peer holds a copy of.
pub(crate) struct Responder {
    state: Mutex<ResponderState>,
    link: Arc<LinkSlot>,
    limit: usize,
}

impl Responder {
    pub fn new(link: Arc<LinkSlot>, limit: usize) -> Self {
        Self {
            state: Mutex::new(ResponderState::default()),
            link,
            limit,
        }
    }

    fn subscriber(self: &Arc<Self>, state: &mut ResponderState, model: &mut Model) -> SubscriberId {
        match state.subscriber {
            Some(id) => id,
            None => {
                let id = model.add_listener(self.clone());
                state.subscriber = Some(id);
                id
            }
        }
    }

    /// Resolve a network id received from the peer.
    pub fn resolve(&self, net: NetworkId) -> Result<NodeKey> {
        let key = NodeKey(net.get());
        if lock(&self.state).held.contains_key(&key) {
            Ok(key)
        } else {
            Err(SyncError::UnknownNetId(net))
        }
    }

    /// Record a bind: hold every included node and count one bind per root.
    pub fn bind(self: &Arc<Self>, model: &mut Model, replica: &Replica) {
        let mut state = lock(&self.state);
        let subscriber = self.subscriber(&mut state, model);
        state.install(model, replica, None, subscriber);
        for (root, _) in replica.included.iter().take(replica.fragments.len()) {
            *state.roots.entry(*root).or_default() += 1;
        }
    }

    /// Replicate `stub` again, expanding it.
    ///
    /// The stub's attribute events stay suppressed until
    /// [`Responder::finish_sync`]; the caller flushes in between so changes
    /// already carried by the returned replica are not sent again.
    pub fn sync(self: &Arc<Self>, model: &mut Model, stub: NodeKey) -> Replica {
        let mut state = lock(&self.state);
        let subscriber = self.subscriber(&mut state, model);
        let replica = replicate(model, &[stub], self.limit, true);
        state.install(model, &replica, None, subscriber);
        state.syncing.insert(stub);
        replica
    }

    pub fn finish_sync(&self, stub: NodeKey) {
        lock(&self.state).syncing.remove(&stub);
    }

    /// Drop one bind of `root`. Returns false if it was not bound.
    ///
    /// The nodes stay held while other binds, or an enclosing bound tree,
    /// still cover them.
    pub fn unbind(&self, model: &mut Model, root: NodeKey) -> bool {
        let mut state = lock(&self.state);
        let Some(count) = state.roots.get_mut(&root) else {
            return false;
        };
        *count -= 1;
        if *count > 0 {
            return true;
        }
        state.roots.remove(&root);
        let nested = state.held.get(&root).is_some_and(|held| held.parent.is_some());
        if !nested {
            state.release(model, root);
        }
        true
    }

    /// Forget everything and unregister from the model.
    pub fn detach(&self, model: &mut Model) {
        let mut state = lock(&self.state);
        if let Some(subscriber) = state.subscriber.take() {
            model.remove_listener(subscriber);
        }
        state.held.clear();
        state.roots.clear();
        state.syncing.clear();
    }

    pub fn ignore_element(&self, key: NodeKey) {
        lock(&self.state).ignored_elements.insert(key);
    }

    pub fn unignore_element(&self, key: NodeKey) {
        lock(&self.state).ignored_elements.remove(&key);
    }

    pub fn ignore_attribute(&self, name: &str) {
        lock(&self.state).ignored_attributes.insert(name.to_string());
    }

    pub fn unignore_attribute(&self, name: &str) {
        lock(&self.state).ignored_attributes.remove(name);
    }

    /// Number of nodes the peer currently holds a copy of.
    pub fn bound_count(&self) -> usize {
        lock(&self.state).held.len()
    }

    fn deltas(&self, model: &mut Model, subscriber: SubscriberId, event: &ModelEvent) -> Vec<Message> {
        let mut state = lock(&self.state);
        let target = event.target();
        if state.subscriber != Some(subscriber) || !state.held.contains_key(&target) {
            return Vec::new();
        }
        let target_net = NetIdMap::owned(target);

        let messages = match event {
            ModelEvent::ChildAdded { parent, .. } | ModelEvent::ChildRemoved { parent, .. } => {
                state.reconcile(model, *parent, self.limit, subscriber)
            }
            ModelEvent::AttributeChanged { node, name, value, .. } => {
                if state.syncing.contains(node) || !forwards_attribute(&state, model, *node, name) {
                    return Vec::new();
                }
                vec![Message::ChangeAttribute {
                    net_id: target_net,
                    name: name.clone(),
                    value: value.clone(),
                }]
            }
            ModelEvent::AttributeCleared { node, name, .. } => {
                if state.syncing.contains(node) || !forwards_attribute(&state, model, *node, name) {
                    return Vec::new();
                }
                vec![Message::ClearAttribute {
                    net_id: target_net,
                    name: name.clone(),
                }]
            }
            ModelEvent::DirtyChanged { node, dirty, .. } => {
                let mut messages = vec![Message::ChangeDirty {
                    net_id: target_net,
                    dirty: *dirty,
                }];
                if *dirty {
                    state.collapse(model, *node);
                } else if let Some(held) = state.held.get_mut(node) {
                    held.children.get_or_insert_with(Vec::new);
                    messages.extend(state.reconcile(model, *node, self.limit, subscriber));
                }
                messages
            }
        };

        // Ignored elements keep their bookkeeping; the peer just hears nothing.
        if state.ignored_elements.contains(&target) {
            return Vec::new();
        }
        messages
    }
}

impl ModelListener for Responder {
    fn notify(&self, model: &mut Model, subscriber: SubscriberId, event: &ModelEvent) {
        for message in self.deltas(model, subscriber, event) {
            trace!(kind = ?message.kind(), "forwarding update");
            if let Err(err) = self.link.send(message) {
                debug!(error = %err, "update dropped");
                return;
            }
        }
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("bound", &self.bound_count())
            .field("limit", &self.limit)
            .finish()
    }
}

fn forwards_attribute(state: &ResponderState, model: &Model, node: NodeKey, name: &str) -> bool {
    if state.ignored_attributes.contains(name) {
        return false;
    }
    // Dirty caching-policy nodes only ever carry their static attributes.
    match model.policy(node) {
        Some(policy) if model.is_dirty(node) => policy.is_static(name),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbound;
    use crate::mirror::Mirror;
    use canopy_model::CachingPolicy;
    use tokio::sync::mpsc;

    fn responder_with(limit: usize) -> (Arc<Responder>, mpsc::UnboundedReceiver<Outbound>) {
        let link = Arc::new(LinkSlot::new());
        let (tx, rx) = mpsc::unbounded_channel();
        link.install(tx);
        (Arc::new(Responder::new(link, limit)), rx)
    }

    fn responder() -> (Arc<Responder>, mpsc::UnboundedReceiver<Outbound>) {
        responder_with(3000)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(Outbound::Message(m)) = rx.try_recv() {
            out.push(m);
        }
        out
    }

    fn tree(model: &mut Model) -> (NodeKey, NodeKey) {
        let config = model.create_node("config");
        model.add_child(model.root(), config, None).unwrap();
        let item = model.create_node("item");
        model.add_child(config, item, None).unwrap();
        model.flush();
        (config, item)
    }

    fn child(model: &mut Model, parent: NodeKey, type_name: &str) -> NodeKey {
        let key = model.create_node(type_name);
        model.add_child(parent, key, None).unwrap();
        key
    }

    /// `config[x[],y[]]`-style rendering of a subtree.
    fn render(model: &Model, key: NodeKey) -> String {
        let children: Vec<String> = model.children(key).iter().map(|c| render(model, *c)).collect();
        format!("{}[{}]", model.type_name(key).unwrap_or_default(), children.join(","))
    }

    /// A peer-side copy fed with everything the responder sends.
    struct Copy {
        model: Model,
        mirror: Mirror,
        root: NodeKey,
    }

    impl Copy {
        fn bind(responder: &Arc<Responder>, model: &mut Model, root: NodeKey) -> Self {
            let replica = replicate(model, &[root], responder.limit, true);
            responder.bind(model, &replica);
            let mut copy = Model::new();
            let mut mirror = Mirror::new();
            let root = mirror.bind(&mut copy, &replica.fragments).unwrap()[0];
            Self {
                model: copy,
                mirror,
                root,
            }
        }

        fn apply(&mut self, messages: &[Message]) {
            for message in messages {
                self.mirror.apply_update(&mut self.model, message).unwrap();
            }
            self.model.flush();
        }

        fn render(&self) -> String {
            render(&self.model, self.root)
        }
    }

    #[test]
    fn test_changes_on_bound_nodes_are_forwarded() {
        let (responder, mut rx) = responder();
        let mut model = Model::new();
        let (config, item) = tree(&mut model);

        let replica = replicate(&model, &[config], 3000, true);
        responder.bind(&mut model, &replica);

        model.set_attribute(item, "v", "1").unwrap();
        let extra = model.create_node("item");
        model.add_child(config, extra, Some(0)).unwrap();
        model.flush();

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);
        assert!(matches!(&messages[0], Message::ChangeAttribute { name, .. } if name == "v"));
        assert!(matches!(
            &messages[1],
            Message::AddChild { index: 0, parent, .. } if *parent == NetIdMap::owned(config)
        ));

        // The added child is now bound as well.
        model.set_attribute(extra, "w", "2").unwrap();
        model.flush();
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn test_removed_subtree_is_unbound() {
        let (responder, mut rx) = responder();
        let mut model = Model::new();
        let (config, item) = tree(&mut model);
        let replica = replicate(&model, &[config], 3000, true);
        responder.bind(&mut model, &replica);

        model.remove_child(config, item).unwrap();
        model.flush();
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [Message::RemoveChild { child }] if *child == NetIdMap::owned(item)
        ));
        assert_eq!(responder.bound_count(), 1);
    }

    #[test]
    fn test_insert_index_counts_only_surviving_siblings() {
        let (responder, mut rx) = responder();
        let mut model = Model::new();
        let root = model.root();
        let config = child(&mut model, root, "config");
        child(&mut model, config, "x");
        child(&mut model, config, "y");
        model.flush();
        let mut copy = Copy::bind(&responder, &mut model, config);

        let a = model.create_node("a");
        model.add_child(config, a, Some(0)).unwrap();
        let b = model.create_node("b");
        model.add_child(config, b, Some(1)).unwrap();
        model.delete(a).unwrap();
        model.flush();

        copy.apply(&drain(&mut rx));
        assert_eq!(render(&model, config), "config[b[],x[],y[]]");
        assert_eq!(copy.render(), "config[b[],x[],y[]]");
    }

    #[test]
    fn test_node_moved_into_new_child_converges() {
        let (responder, mut rx) = responder();
        let mut model = Model::new();
        let root = model.root();
        let config = child(&mut model, root, "config");
        let x = child(&mut model, config, "x");
        child(&mut model, config, "y");
        model.flush();
        let mut copy = Copy::bind(&responder, &mut model, config);

        let a = child(&mut model, config, "a");
        model.detach(x).unwrap();
        model.add_child(a, x, None).unwrap();
        model.flush();

        copy.apply(&drain(&mut rx));
        assert_eq!(copy.render(), "config[y[],a[x[]]]");
        assert_eq!(copy.render(), render(&model, config));

        // The moved node is still bound, under its new parent.
        model.set_attribute(x, "v", "1").unwrap();
        model.flush();
        copy.apply(&drain(&mut rx));
        let x_copy = copy.mirror.ids.key(NetIdMap::owned(x)).unwrap();
        assert_eq!(copy.model.attribute(x_copy, "v"), Some("1"));
    }

    #[test]
    fn test_move_between_bound_parents_converges() {
        let (responder, mut rx) = responder();
        let mut model = Model::new();
        let root = model.root();
        let config = child(&mut model, root, "config");
        let x = child(&mut model, config, "x");
        let y = child(&mut model, config, "y");
        let leaf = child(&mut model, x, "leaf");
        model.flush();
        let mut copy = Copy::bind(&responder, &mut model, config);

        model.detach(leaf).unwrap();
        model.add_child(y, leaf, None).unwrap();
        model.detach(x).unwrap();
        model.add_child(config, x, None).unwrap();
        model.flush();

        copy.apply(&drain(&mut rx));
        assert_eq!(copy.render(), "config[y[leaf[]],x[]]");
        assert_eq!(responder.bound_count(), 4);
    }

    #[test]
    fn test_dirty_toggle_converges() {
        let (responder, mut rx) = responder();
        let mut model = Model::new();
        let root = model.root();
        let config = child(&mut model, root, "config");
        let item = child(&mut model, config, "item");
        child(&mut model, item, "old");
        model
            .set_policy(item, Some(CachingPolicy::new("db", &["id"])))
            .unwrap();
        model.flush();
        let mut copy = Copy::bind(&responder, &mut model, config);

        model.set_dirty(item, true).unwrap();
        model.set_dirty(item, false).unwrap();
        child(&mut model, item, "fresh");
        model.flush();

        copy.apply(&drain(&mut rx));
        assert_eq!(copy.render(), "config[item[fresh[]]]");
        assert_eq!(responder.bound_count(), 3);
    }

    #[test]
    fn test_ignored_attribute_and_element() {
        let (responder, mut rx) = responder();
        let mut model = Model::new();
        let (config, item) = tree(&mut model);
        let replica = replicate(&model, &[config], 3000, true);
        responder.bind(&mut model, &replica);

        responder.ignore_attribute("secret");
        responder.ignore_element(item);
        model.set_attribute(config, "secret", "x").unwrap();
        model.set_attribute(item, "v", "1").unwrap();
        model.set_attribute(config, "shown", "y").unwrap();
        model.flush();

        assert!(matches!(
            drain(&mut rx).as_slice(),
            [Message::ChangeAttribute { name, .. }] if name == "shown"
        ));
    }

    #[test]
    fn test_no_structural_deltas_under_stub() {
        let (responder, mut rx) = responder_with(0);
        let mut model = Model::new();
        let (config, item) = tree(&mut model);
        child(&mut model, item, "leaf");
        model.flush();

        // Limit 0: config is a root, item becomes a stub.
        let replica = replicate(&model, &[config], 0, true);
        responder.bind(&mut model, &replica);
        child(&mut model, item, "leaf");
        model.set_attribute(item, "seen", "yes").unwrap();
        model.flush();

        assert!(matches!(
            drain(&mut rx).as_slice(),
            [Message::ChangeAttribute { name, .. }] if name == "seen"
        ));
    }

    #[test]
    fn test_sync_does_not_resend_changes_it_carries() {
        let (responder, mut rx) = responder_with(0);
        let mut model = Model::new();
        let (config, item) = tree(&mut model);
        child(&mut model, item, "leaf");
        model.flush();
        let replica = replicate(&model, &[config], 0, true);
        responder.bind(&mut model, &replica);

        // Same job: the stub changes, then the sync is answered.
        model.set_attribute(item, "v", "1").unwrap();
        let synced = responder.sync(&mut model, item);
        model.flush();
        responder.finish_sync(item);

        assert!(drain(&mut rx).is_empty());
        assert_eq!(synced.fragments[0].attribute("v"), Some("1"));
        assert_eq!(synced.fragments[0].children.len(), 1);
        assert_eq!(responder.bound_count(), 3);

        model.set_attribute(item, "v", "2").unwrap();
        model.flush();
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [Message::ChangeAttribute { value, .. }] if value == "2"
        ));
    }

    #[test]
    fn test_dirty_policy_node_forwards_static_attributes_only() {
        let (responder, mut rx) = responder();
        let mut model = Model::new();
        let (config, item) = tree(&mut model);
        model
            .set_policy(item, Some(CachingPolicy::new("db", &["id"])))
            .unwrap();
        let replica = replicate(&model, &[config], 3000, true);
        responder.bind(&mut model, &replica);

        model.set_dirty(item, true).unwrap();
        model.set_attribute(item, "id", "9").unwrap();
        model.set_attribute(item, "payload", "x").unwrap();
        model.flush();

        let messages = drain(&mut rx);
        assert!(matches!(&messages[0], Message::ChangeDirty { dirty: true, .. }));
        assert!(matches!(&messages[1], Message::ChangeAttribute { name, .. } if name == "id"));
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn test_unbind_and_detach() {
        let (responder, mut rx) = responder();
        let mut model = Model::new();
        let (config, item) = tree(&mut model);
        let replica = replicate(&model, &[config], 3000, true);
        responder.bind(&mut model, &replica);

        assert!(responder.unbind(&mut model, config));
        assert!(!responder.unbind(&mut model, config));
        model.set_attribute(item, "v", "1").unwrap();
        model.flush();
        assert!(drain(&mut rx).is_empty());

        let replica = replicate(&model, &[config], 3000, true);
        responder.bind(&mut model, &replica);
        responder.detach(&mut model);
        assert_eq!(responder.bound_count(), 0);
        model.set_attribute(item, "v", "2").unwrap();
        model.flush();
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_repeated_bind_needs_as_many_unbinds() {
        let (responder, mut rx) = responder();
        let mut model = Model::new();
        let (config, item) = tree(&mut model);
        let replica = replicate(&model, &[config], 3000, true);
        responder.bind(&mut model, &replica);
        responder.bind(&mut model, &replica);
        assert_eq!(responder.bound_count(), 2);

        assert!(responder.unbind(&mut model, config));
        model.set_attribute(item, "v", "1").unwrap();
        model.flush();
        assert_eq!(drain(&mut rx).len(), 1);

        assert!(responder.unbind(&mut model, config));
        model.set_attribute(item, "v", "2").unwrap();
        model.flush();
        assert!(drain(&mut rx).is_empty());
        assert!(!responder.unbind(&mut model, config));
    }

    #[test]
    fn test_nested_bind_root_outlives_its_unbind() {
        let (responder, mut rx) = responder();
        let mut model = Model::new();
        let (config, item) = tree(&mut model);
        let outer = replicate(&model, &[config], 3000, true);
        responder.bind(&mut model, &outer);
        let inner = replicate(&model, &[item], 3000, true);
        responder.bind(&mut model, &inner);
        assert_eq!(responder.bound_count(), 2);

        assert!(responder.unbind(&mut model, item));
        assert_eq!(responder.bound_count(), 2);
        model.set_attribute(item, "v", "1").unwrap();
        model.flush();
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn test_resolve_unknown() {
        let (responder, _rx) = responder();
        assert!(matches!(
            responder.resolve(NetworkId::new(77)),
            Err(SyncError::UnknownNetId(_))
        ));
    }
}
