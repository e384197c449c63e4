//! Applying received trees and deltas to the local mirror.
//!
//! All functions here run on the dispatcher. Mirror nodes are ordinary model
//! nodes; only the [`NetIdMap`] ties them to the remote tree.

use std::collections::{HashMap, HashSet};

use canopy_core::{Fragment, Message, NetworkId, WireValue};
use canopy_model::{Model, NodeKey, Value};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::netid::NetIdMap;

/// The trees this side bound, as local nodes.
///
/// One remote node has at most one local copy: a bind, sync or delta that
/// carries a network id already mapped here reuses the mapped node.
#[derive(Debug, Default)]
pub(crate) struct Mirror {
    /// Remote network id -> local mirror node.
    pub ids: NetIdMap,
    /// Live binds per bound root. Mirrors the owner's count.
    binds: HashMap<NetworkId, u32>,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything, e.g. when the connection drops.
    pub fn clear(&mut self) {
        self.ids.clear();
        self.binds.clear();
    }

    /// Live binds of the root with network id `net`.
    pub fn bind_count(&self, net: NetworkId) -> u32 {
        self.binds.get(&net).copied().unwrap_or(0)
    }

    /// Materialize bind roots as local roots, one per fragment.
    ///
    /// A root this side already mirrors is refreshed in place and keeps its
    /// key, wherever it sits.
    pub fn bind(&mut self, model: &mut Model, roots: &[Fragment]) -> Result<Vec<NodeKey>> {
        let mut keys = Vec::with_capacity(roots.len());
        for root in roots {
            keys.push(self.graft(model, root)?);
            if let Some(net) = root.net_id {
                *self.binds.entry(net).or_default() += 1;
            }
        }
        Ok(keys)
    }

    /// Drop one bind of `net`. Once the last bind of a root goes and the
    /// root is not part of another mirrored tree, its mappings are
    /// forgotten; the local nodes stay.
    ///
    /// Returns the number of mappings forgotten.
    pub fn unbind(&mut self, model: &Model, net: NetworkId) -> usize {
        match self.bind_count(net) {
            0 => return 0,
            1 => {
                self.binds.remove(&net);
            }
            n => {
                self.binds.insert(net, n - 1);
                return 0;
            }
        }
        let Some(root) = self.ids.key(net) else {
            return 0;
        };
        if self.is_nested(model, root) {
            return 0;
        }
        self.forget(model, root)
    }

    /// Whether `key` hangs below another mirrored node.
    fn is_nested(&self, model: &Model, key: NodeKey) -> bool {
        model
            .parent(key)
            .is_some_and(|parent| self.ids.contains_key(parent))
    }

    /// Forget the mappings (and binds) of `key` and its descendants.
    pub fn forget(&mut self, model: &Model, key: NodeKey) -> usize {
        let mut forgotten = 0;
        for k in model.subtree(key) {
            if let Some(net) = self.ids.remove_key(k) {
                self.binds.remove(&net);
                forgotten += 1;
            }
        }
        forgotten
    }

    /// Build a detached copy of `fragment`, recording its network ids.
    ///
    /// A fragment whose network id is already mapped refreshes the mapped
    /// node instead, and that node is returned as it is (possibly still
    /// attached).
    fn graft(&mut self, model: &mut Model, fragment: &Fragment) -> Result<NodeKey> {
        let existing = fragment
            .net_id
            .and_then(|net| self.ids.key(net))
            .filter(|key| model.contains(*key));
        if let Some(key) = existing {
            return self.splice(model, key, fragment);
        }

        let key = model.create_node(fragment.type_name.clone());
        model.replace_attributes_quietly(key, fragment.attributes.clone())?;
        model.set_stub(key, fragment.stub)?;
        if fragment.dirty {
            model.set_dirty(key, true)?;
        }
        if let Some(net) = fragment.net_id {
            self.ids.insert(net, key);
        }
        self.graft_children(model, key, fragment)?;
        Ok(key)
    }

    fn graft_children(&mut self, model: &mut Model, key: NodeKey, fragment: &Fragment) -> Result<()> {
        for child in &fragment.children {
            let child_key = self.graft(model, child)?;
            if model.parent(child_key).is_some() {
                model.detach(child_key)?;
            }
            model.add_child(key, child_key, None)?;
        }
        Ok(())
    }

    /// Replace the content of `key` with `fragment`. The node keeps its key
    /// and its own mapping; old children the fragment does not carry again
    /// are deleted and forgotten.
    fn splice(&mut self, model: &mut Model, key: NodeKey, fragment: &Fragment) -> Result<NodeKey> {
        let stale: Vec<String> = model
            .attributes(key)
            .iter()
            .filter(|(name, _)| fragment.attribute(name).is_none())
            .map(|(name, _)| name.clone())
            .collect();
        for name in stale {
            model.clear_attribute(key, &name)?;
        }
        for (name, value) in &fragment.attributes {
            model.set_attribute(key, name, value.clone())?;
        }

        // Mirrored nodes the fragment carries again are detached and reused.
        let carried: HashSet<NetworkId> = fragment
            .walk_breadth_first()
            .into_iter()
            .filter_map(|f| f.net_id)
            .collect();
        for child in model.children(key).to_vec() {
            for k in model.subtree(child) {
                match self.ids.net(k) {
                    Some(net) if carried.contains(&net) => model.detach(k)?,
                    Some(net) => {
                        self.ids.remove_key(k);
                        self.binds.remove(&net);
                    }
                    None => {}
                }
            }
            if model.parent(child).is_some() {
                model.delete(child)?;
            }
        }
        model.set_dirty(key, fragment.dirty)?;
        model.set_stub(key, fragment.stub)?;

        self.graft_children(model, key, fragment)?;
        Ok(key)
    }

    /// Splice a sync result into `stub`.
    pub fn sync(&mut self, model: &mut Model, stub: NodeKey, fragment: &Fragment) -> Result<NodeKey> {
        if !model.contains(stub) {
            return Err(canopy_model::ModelError::UnknownNode(stub).into());
        }
        self.splice(model, stub, fragment)
    }

    /// Apply one update message. Returns false if it addressed a node this
    /// side does not mirror, in which case it is dropped.
    pub fn apply_update(&mut self, model: &mut Model, message: &Message) -> Result<bool> {
        let addressed = match message {
            Message::AddChild { parent, .. } => *parent,
            Message::RemoveChild { child } => *child,
            Message::ChangeAttribute { net_id, .. }
            | Message::ClearAttribute { net_id, .. }
            | Message::ChangeDirty { net_id, .. } => *net_id,
            other => {
                return Err(SyncError::Codec(format!(
                    "{:?} is not an update",
                    other.kind()
                )))
            }
        };
        let Some(key) = self.ids.key(addressed) else {
            debug!(net_id = %addressed, kind = ?message.kind(), "update for unknown network id dropped");
            return Ok(false);
        };

        match message {
            Message::AddChild { index, child, .. } => {
                let child_key = self.graft(model, child)?;
                if model.parent(child_key).is_some() {
                    model.detach(child_key)?;
                }
                model.add_child(key, child_key, Some(*index as usize))?;
            }
            Message::RemoveChild { .. } => {
                self.forget(model, key);
                model.delete(key)?;
            }
            Message::ChangeAttribute { name, value, .. } => {
                model.set_attribute(key, name, value.clone())?;
            }
            Message::ClearAttribute { name, .. } => {
                model.clear_attribute(key, name)?;
            }
            Message::ChangeDirty { dirty, .. } => {
                let children = model.children(key).to_vec();
                if model.set_dirty(key, *dirty)? && *dirty {
                    for child in children {
                        self.forget(model, child);
                    }
                }
            }
            _ => {}
        }
        Ok(true)
    }
}

/// Local value for a received wire value. Node-sets become new detached
/// subtrees without network ids.
pub(crate) fn materialize(model: &mut Model, value: &WireValue) -> Value {
    match value {
        WireValue::Nodes(fragments) => {
            Value::Nodes(fragments.iter().map(|f| model.instantiate(f)).collect())
        }
        WireValue::Text(s) => Value::Text(s.clone()),
        WireValue::Number(n) => Value::Number(*n),
        WireValue::Bool(b) => Value::Bool(*b),
    }
}

/// Wire form of a local value. Node-sets are deep copies.
pub(crate) fn to_wire(model: &Model, value: &Value) -> Result<WireValue> {
    Ok(match value {
        Value::Nodes(keys) => WireValue::Nodes(
            keys.iter()
                .map(|k| model.to_fragment(*k))
                .collect::<canopy_model::Result<Vec<_>>>()?,
        ),
        Value::Text(s) => WireValue::Text(s.clone()),
        Value::Number(n) => WireValue::Number(*n),
        Value::Bool(b) => WireValue::Bool(*b),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(n: u64) -> NetworkId {
        NetworkId::new(n)
    }

    fn config() -> Fragment {
        Fragment::new("config")
            .with_net_id(net(100))
            .attr("mode", "fast")
            .child(Fragment::new("item").with_net_id(net(101)))
            .child(Fragment::new("group").with_net_id(net(102)).stubbed(false))
    }

    fn bound() -> (Model, Mirror, NodeKey) {
        let mut model = Model::new();
        let mut mirror = Mirror::new();
        let roots = mirror.bind(&mut model, &[config()]).unwrap();
        (model, mirror, roots[0])
    }

    #[test]
    fn test_bind_builds_detached_root() {
        let (model, mirror, root) = bound();
        assert_eq!(model.parent(root), None);
        assert_eq!(model.children(root).len(), 2);
        assert_eq!(mirror.ids.len(), 3);
        assert_eq!(mirror.bind_count(net(100)), 1);
        let group = mirror.ids.key(net(102)).unwrap();
        assert!(model.is_stub(group));
    }

    #[test]
    fn test_binding_same_root_twice_reuses_node() {
        let (mut model, mut mirror, root) = bound();
        let item = mirror.ids.key(net(101)).unwrap();

        let fresh = config().attr("extra", "1");
        let again = mirror.bind(&mut model, &[fresh]).unwrap();
        model.flush();

        assert_eq!(again, vec![root]);
        assert_eq!(mirror.ids.key(net(100)), Some(root));
        assert_eq!(mirror.ids.key(net(101)), Some(item));
        assert!(model.contains(item));
        assert_eq!(model.attribute(root, "extra"), Some("1"));
        assert_eq!(model.children(root).len(), 2);
        assert_eq!(mirror.bind_count(net(100)), 2);
    }

    #[test]
    fn test_unbind_forgets_after_last_bind() {
        let (mut model, mut mirror, root) = bound();
        mirror.bind(&mut model, &[config()]).unwrap();

        assert_eq!(mirror.unbind(&model, net(100)), 0);
        assert_eq!(mirror.ids.key(net(100)), Some(root));

        assert_eq!(mirror.unbind(&model, net(100)), 3);
        assert!(mirror.ids.is_empty());
        assert_eq!(mirror.unbind(&model, net(100)), 0);
        model.flush();
        assert!(model.contains(root));
    }

    #[test]
    fn test_unbind_of_nested_root_keeps_enclosing_tree() {
        let (mut model, mut mirror, _) = bound();
        let item = Fragment::new("item").with_net_id(net(101));
        let keys = mirror.bind(&mut model, &[item]).unwrap();
        assert_eq!(Some(keys[0]), mirror.ids.key(net(101)));

        assert_eq!(mirror.unbind(&model, net(101)), 0);
        assert_eq!(mirror.ids.key(net(101)), Some(keys[0]));
        assert_eq!(mirror.ids.len(), 3);
    }

    #[test]
    fn test_sync_keeps_stub_mapping() {
        let (mut model, mut mirror, _) = bound();
        let group = mirror.ids.key(net(102)).unwrap();

        let expanded = Fragment::new("group")
            .with_net_id(net(102))
            .attr("id", "g")
            .child(Fragment::new("section").with_net_id(net(103)));
        assert_eq!(mirror.sync(&mut model, group, &expanded).unwrap(), group);

        assert_eq!(mirror.ids.key(net(102)), Some(group));
        assert!(!model.is_stub(group));
        assert_eq!(model.attribute(group, "id"), Some("g"));
        let section = mirror.ids.key(net(103)).unwrap();
        assert_eq!(model.parent(section), Some(group));
    }

    #[test]
    fn test_resync_replaces_children_and_reuses_carried_nodes() {
        let (mut model, mut mirror, root) = bound();
        let item = mirror.ids.key(net(101)).unwrap();

        let refreshed = Fragment::new("config")
            .with_net_id(net(100))
            .child(Fragment::new("new").with_net_id(net(104)))
            .child(Fragment::new("item").with_net_id(net(101)).attr("v", "2"));
        mirror.sync(&mut model, root, &refreshed).unwrap();
        model.flush();

        assert_eq!(model.attribute(root, "mode"), None);
        let children = model.children(root).to_vec();
        assert_eq!(children.len(), 2);
        assert_eq!(children[1], item);
        assert_eq!(model.attribute(item, "v"), Some("2"));
        assert_eq!(mirror.ids.key(net(102)), None);
        assert_eq!(mirror.ids.len(), 3);
    }

    #[test]
    fn test_updates_apply_and_unknown_ids_drop() {
        let (mut model, mut mirror, root) = bound();
        let add = Message::AddChild {
            parent: net(100),
            index: 0,
            child: Fragment::new("first").with_net_id(net(200)),
        };
        assert!(mirror.apply_update(&mut model, &add).unwrap());
        assert_eq!(model.type_name(model.children(root)[0]), Some("first"));

        let change = Message::ChangeAttribute {
            net_id: net(101),
            name: "v".into(),
            value: "1".into(),
        };
        assert!(mirror.apply_update(&mut model, &change).unwrap());

        let remove = Message::RemoveChild { child: net(101) };
        assert!(mirror.apply_update(&mut model, &remove).unwrap());
        assert_eq!(mirror.ids.key(net(101)), None);

        let orphan = Message::ClearAttribute {
            net_id: net(999),
            name: "x".into(),
        };
        assert!(!mirror.apply_update(&mut model, &orphan).unwrap());
    }

    #[test]
    fn test_change_dirty_drops_children_and_ids() {
        let (mut model, mut mirror, root) = bound();
        let dirty = Message::ChangeDirty {
            net_id: net(100),
            dirty: true,
        };
        assert!(mirror.apply_update(&mut model, &dirty).unwrap());
        assert!(model.is_dirty(root));
        assert!(model.children(root).is_empty());
        assert_eq!(mirror.ids.len(), 1);
    }

    #[test]
    fn test_forget_keeps_nodes() {
        let (mut model, mut mirror, root) = bound();
        assert_eq!(mirror.forget(&model, root), 3);
        assert!(mirror.ids.is_empty());
        assert_eq!(mirror.bind_count(net(100)), 0);
        model.flush();
        assert!(model.contains(root));
    }

    #[test]
    fn test_value_conversion() {
        let mut model = Model::new();
        let value = WireValue::Nodes(vec![Fragment::new("x").attr("a", "1")]);
        let local = materialize(&mut model, &value);
        let keys = local.as_nodes().unwrap().to_vec();
        assert_eq!(model.attribute(keys[0], "a"), Some("1"));
        assert_eq!(to_wire(&model, &local).unwrap(), value);
        assert_eq!(to_wire(&model, &Value::Number(2.0)).unwrap(), WireValue::Number(2.0));
    }
}
