//! Tree fragments: the unit of tree replication.
//!
//! A [`Fragment`] is a detached, serializable copy of a subtree. Nodes that
//! were not expanded (budget exhausted, or backed by a caching policy that is
//! currently dirty) appear as stubs: type name, static attributes, the dirty
//! flag and a network id, but no children.

use serde::{Deserialize, Serialize};

use crate::types::NetworkId;

/// A serializable copy of a tree node and (unless stubbed) its descendants.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Fragment {
    /// Wire handle, present when the owning side tracks this node.
    pub net_id: Option<NetworkId>,
    /// Element type name.
    pub type_name: String,
    /// Attributes in insertion order.
    pub attributes: Vec<(String, String)>,
    /// Children in document order. Empty for stubs, except for expanded
    /// caching-policy nodes which keep the stub marker for later re-sync.
    pub children: Vec<Fragment>,
    /// The node may be re-synced; unless expanded, its children were not sent.
    pub stub: bool,
    /// The node is backed by a caching policy and is not materialized.
    pub dirty: bool,
}

impl Fragment {
    /// Create an empty fragment of the given type.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Self::default()
        }
    }

    /// Builder: set the network id.
    pub fn with_net_id(mut self, net_id: NetworkId) -> Self {
        self.net_id = Some(net_id);
        self
    }

    /// Builder: append an attribute.
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    /// Builder: append a child.
    pub fn child(mut self, child: Fragment) -> Self {
        self.children.push(child);
        self
    }

    /// Builder: mark as stub.
    pub fn stubbed(mut self, dirty: bool) -> Self {
        self.stub = true;
        self.dirty = dirty;
        self.children.clear();
        self
    }

    /// Look up an attribute value by name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Total number of nodes in this fragment, including itself.
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(Fragment::len).sum::<usize>()
    }

    /// Fragments are never empty; provided for clippy symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Number of stub nodes in this fragment.
    pub fn stub_count(&self) -> usize {
        usize::from(self.stub) + self.children.iter().map(Fragment::stub_count).sum::<usize>()
    }

    /// Visit every node breadth-first.
    pub fn walk_breadth_first(&self) -> Vec<&Fragment> {
        let mut out = Vec::with_capacity(self.len());
        out.push(self);
        let mut i = 0;
        while i < out.len() {
            let node = out[i];
            out.extend(node.children.iter());
            i += 1;
        }
        out
    }

    /// Copy of this fragment with every network id removed.
    ///
    /// Useful when comparing the shape of two replicas whose ids were minted
    /// on different sides.
    pub fn without_net_ids(&self) -> Fragment {
        Fragment {
            net_id: None,
            type_name: self.type_name.clone(),
            attributes: self.attributes.clone(),
            children: self.children.iter().map(Fragment::without_net_ids).collect(),
            stub: self.stub,
            dirty: self.dirty,
        }
    }
}

/// A type-tagged value as carried by query results and variable scopes.
///
/// Node-sets travel as deep copies. Attribute and text pseudo-nodes are
/// never sent as nodes; they degrade to [`WireValue::Text`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireValue {
    Nodes(Vec<Fragment>),
    Text(String),
    Number(f64),
    Bool(bool),
}

impl WireValue {
    /// Wire tag for this value.
    pub fn tag(&self) -> u8 {
        match self {
            WireValue::Nodes(_) => 0,
            WireValue::Text(_) => 1,
            WireValue::Number(_) => 2,
            WireValue::Bool(_) => 3,
        }
    }

    /// Node-set contents, if this is a node-set.
    pub fn as_nodes(&self) -> Option<&[Fragment]> {
        match self {
            WireValue::Nodes(nodes) => Some(nodes),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Fragment {
        Fragment::new("config")
            .attr("name", "main")
            .child(Fragment::new("item").attr("id", "1"))
            .child(
                Fragment::new("group")
                    .child(Fragment::new("item").attr("id", "2"))
                    .child(Fragment::new("item").stubbed(true)),
            )
    }

    #[test]
    fn test_fragment_len_and_stubs() {
        let f = sample();
        assert_eq!(f.len(), 5);
        assert_eq!(f.stub_count(), 1);
    }

    #[test]
    fn test_fragment_attribute_lookup() {
        let f = sample();
        assert_eq!(f.attribute("name"), Some("main"));
        assert_eq!(f.attribute("missing"), None);
    }

    #[test]
    fn test_breadth_first_order() {
        let f = sample();
        let names: Vec<_> = f
            .walk_breadth_first()
            .iter()
            .map(|n| n.type_name.as_str())
            .collect();
        assert_eq!(names, vec!["config", "item", "group", "item", "item"]);
    }

    #[test]
    fn test_stubbed_drops_children() {
        let f = Fragment::new("a").child(Fragment::new("b")).stubbed(false);
        assert!(f.stub);
        assert!(f.children.is_empty());
    }

    #[test]
    fn test_without_net_ids() {
        let f = Fragment::new("a")
            .with_net_id(NetworkId::new(1))
            .child(Fragment::new("b").with_net_id(NetworkId::new(2)));
        let stripped = f.without_net_ids();
        assert!(stripped.net_id.is_none());
        assert!(stripped.children[0].net_id.is_none());
    }
}
