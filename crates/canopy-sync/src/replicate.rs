//! Budgeted breadth-first replication.
//!
//! Turns a set of roots into fragments, stubbing what does not fit:
//!
//! 1. Roots are always included and expanded, whatever the budget.
//! 2. A running count starts at the number of roots and grows by one per
//!    non-root node visited, breadth-first.
//! 3. A dirty caching-policy node becomes a stub with its static attributes
//!    and the dirty flag. Nothing beneath it is visited.
//! 4. A clean caching-policy node is expanded but keeps the stub marker so
//!    the peer knows it may re-sync it.
//! 5. Any other node with children becomes a stub once the count exceeds
//!    the limit.
//!
//! So at most `max(roots, limit)` nodes without a caching policy have their
//! children sent.

use std::collections::{HashMap, HashSet, VecDeque};

use canopy_core::Fragment;
use canopy_model::{Model, NodeKey};

use crate::netid::NetIdMap;

/// How a node was replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// All attributes and all children.
    Full,
    /// Clean caching-policy node: full, plus the stub marker.
    Cached,
    /// Children omitted.
    Stub { dirty: bool },
}

impl Shape {
    /// Whether the node's children were sent.
    pub fn is_expanded(&self) -> bool {
        !matches!(self, Shape::Stub { .. })
    }
}

/// Result of one replication pass.
#[derive(Debug, Clone)]
pub struct Replica {
    /// One fragment per root, in root order.
    pub fragments: Vec<Fragment>,
    /// Every included node with its shape, breadth-first.
    pub included: Vec<(NodeKey, Shape)>,
    /// Nodes without a caching policy whose children were sent.
    pub expanded: usize,
}

impl Replica {
    /// Nodes whose children were not sent.
    pub fn stubs(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.included
            .iter()
            .filter(|(_, s)| !s.is_expanded())
            .map(|(k, _)| *k)
    }
}

/// Replicate `roots` under `limit`.
///
/// With `with_ids` every fragment carries its owner-assigned network id;
/// query results travel without ids. Unknown or duplicate roots are skipped.
pub fn replicate(model: &Model, roots: &[NodeKey], limit: usize, with_ids: bool) -> Replica {
    let mut seen = HashSet::new();
    let roots: Vec<NodeKey> = roots
        .iter()
        .copied()
        .filter(|k| model.contains(*k) && seen.insert(*k))
        .collect();

    let mut shapes: HashMap<NodeKey, Shape> = HashMap::new();
    let mut included = Vec::new();
    let mut queue = VecDeque::new();

    for root in &roots {
        let shape = match classify_policy(model, *root) {
            Some(shape) => shape,
            None => Shape::Full,
        };
        shapes.insert(*root, shape);
        included.push((*root, shape));
        if shape.is_expanded() {
            queue.extend(model.children(*root).iter().copied());
        }
    }

    let mut count = roots.len();
    while let Some(key) = queue.pop_front() {
        if shapes.contains_key(&key) {
            continue;
        }
        count += 1;

        let shape = match classify_policy(model, key) {
            Some(shape) => shape,
            None if count > limit && !model.children(key).is_empty() => {
                Shape::Stub { dirty: false }
            }
            None => Shape::Full,
        };
        shapes.insert(key, shape);
        included.push((key, shape));
        if shape.is_expanded() {
            queue.extend(model.children(key).iter().copied());
        }
    }

    let fragments = roots
        .iter()
        .map(|root| build(model, *root, &shapes, with_ids))
        .collect();
    let expanded = included
        .iter()
        .filter(|(k, s)| *s == Shape::Full && !model.children(*k).is_empty())
        .count();

    Replica {
        fragments,
        included,
        expanded,
    }
}

fn classify_policy(model: &Model, key: NodeKey) -> Option<Shape> {
    model.policy(key)?;
    Some(if model.is_dirty(key) {
        Shape::Stub { dirty: true }
    } else {
        Shape::Cached
    })
}

fn build(model: &Model, key: NodeKey, shapes: &HashMap<NodeKey, Shape>, with_ids: bool) -> Fragment {
    let shape = shapes.get(&key).copied().unwrap_or(Shape::Stub { dirty: false });

    let attributes = match (shape, model.policy(key)) {
        (Shape::Stub { dirty: true }, Some(policy)) => model
            .attributes(key)
            .iter()
            .filter(|(name, _)| policy.is_static(name))
            .cloned()
            .collect(),
        _ => model.attributes(key).to_vec(),
    };

    let children = if shape.is_expanded() {
        model
            .children(key)
            .iter()
            .filter(|c| shapes.contains_key(c))
            .map(|c| build(model, *c, shapes, with_ids))
            .collect()
    } else {
        Vec::new()
    };

    Fragment {
        net_id: with_ids.then(|| NetIdMap::owned(key)),
        type_name: model.type_name(key).unwrap_or_default().to_string(),
        attributes,
        children,
        stub: !matches!(shape, Shape::Full),
        dirty: matches!(shape, Shape::Stub { dirty: true }),
    }
}
