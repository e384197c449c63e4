//! Subscription table types.
//!
//! A subscriber is a handler object registered once with the model and
//! attached to any number of nodes. Each (node, subscriber) pair is unique,
//! so a handler sees every event on a node exactly once.

use std::fmt;

use crate::model::Model;
use crate::node::NodeKey;

/// Token naming one registered [`ModelListener`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

impl fmt::Debug for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriberId({})", self.0)
    }
}

/// A structural or attribute change observed on a subscribed node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    /// `child` was inserted at `index` under the subscribed `parent`.
    ChildAdded {
        parent: NodeKey,
        child: NodeKey,
        index: usize,
    },
    /// `child` was removed from the subscribed `parent`.
    ///
    /// The detached subtree stays readable until the end of the flush that
    /// delivers this event.
    ChildRemoved {
        parent: NodeKey,
        child: NodeKey,
        index: usize,
    },
    /// Attribute set on the subscribed node.
    AttributeChanged {
        node: NodeKey,
        name: String,
        value: String,
        old: Option<String>,
    },
    /// Attribute removed from the subscribed node.
    AttributeCleared {
        node: NodeKey,
        name: String,
        old: String,
    },
    /// Dirty flag changed on the subscribed node.
    ///
    /// When the node became dirty its children were dropped; their keys are
    /// listed in `dropped` and stay readable until the flush ends.
    DirtyChanged {
        node: NodeKey,
        dirty: bool,
        dropped: Vec<NodeKey>,
    },
}

impl ModelEvent {
    /// The node the event was raised on.
    pub fn target(&self) -> NodeKey {
        match self {
            ModelEvent::ChildAdded { parent, .. } | ModelEvent::ChildRemoved { parent, .. } => {
                *parent
            }
            ModelEvent::AttributeChanged { node, .. }
            | ModelEvent::AttributeCleared { node, .. }
            | ModelEvent::DirtyChanged { node, .. } => *node,
        }
    }
}

/// Handler for model events.
///
/// Called from [`Model::flush`] with mutable access to the model. Handlers
/// may change subscriptions; tree mutations they make are queued and
/// delivered later in the same flush.
pub trait ModelListener: Send + Sync {
    fn notify(&self, model: &mut Model, subscriber: SubscriberId, event: &ModelEvent);
}
