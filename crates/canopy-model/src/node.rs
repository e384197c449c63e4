//! Node storage types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable arena key of a node.
///
/// Keys are never reused within one model, so a stale key can only miss,
/// never alias another node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey(pub u64);

impl NodeKey {
    /// Raw key value.
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeKey({})", self.0)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Marks a node as backed by an external data source.
///
/// A node with a policy may be dirty, meaning its content is not loaded.
/// Only the attributes the policy declares static are meaningful while the
/// node is dirty.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CachingPolicy {
    /// Policy name, for diagnostics.
    pub name: String,
    /// Attributes that are known without loading the node.
    pub static_attributes: Vec<String>,
}

impl CachingPolicy {
    /// Create a policy with the given static attributes.
    pub fn new(name: impl Into<String>, static_attributes: &[&str]) -> Self {
        Self {
            name: name.into(),
            static_attributes: static_attributes.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Whether `name` is a static attribute.
    pub fn is_static(&self, name: &str) -> bool {
        self.static_attributes.iter().any(|s| s == name)
    }
}

/// One arena slot.
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub type_name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<NodeKey>,
    pub parent: Option<NodeKey>,
    pub policy: Option<CachingPolicy>,
    pub dirty: bool,
    pub stub: bool,
}

impl Node {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
            parent: None,
            policy: None,
            dirty: false,
            stub: false,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}
