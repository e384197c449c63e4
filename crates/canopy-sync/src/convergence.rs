//! Convergence verification for replicated trees.
//!
//! After updates settle, a mirror and its authoritative subtree should be
//! identical. Both sides can compute a deterministic digest and compare
//! digests instead of whole trees.
//!
//! Algorithm, depth-first pre-order:
//! 1. Domain prefix `canopy-tree-v1:`
//! 2. Per node: type name, attribute count, each `(name, value)` in order,
//!    stub and dirty flags, child count
//! 3. Then each child, in child order
//!
//! Strings are length-prefixed (u64 big-endian) so concatenations cannot
//! collide. Network ids do not contribute.

use std::fmt;

use canopy_core::Fragment;
use canopy_model::{Model, NodeKey};

/// Blake3 digest of a subtree.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubtreeDigest(pub [u8; 32]);

impl SubtreeDigest {
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Display for SubtreeDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for SubtreeDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubtreeDigest({})", &self.to_hex()[..16])
    }
}

/// Digest of the subtree at `key`, or `None` if the node does not exist.
pub fn subtree_digest(model: &Model, key: NodeKey) -> Option<SubtreeDigest> {
    if !model.contains(key) {
        return None;
    }
    let mut hasher = start();
    hash_node(model, key, &mut hasher);
    Some(SubtreeDigest(*hasher.finalize().as_bytes()))
}

/// Digest of a fragment; equal to [`subtree_digest`] of the tree it copies.
pub fn fragment_digest(fragment: &Fragment) -> SubtreeDigest {
    let mut hasher = start();
    hash_fragment(fragment, &mut hasher);
    SubtreeDigest(*hasher.finalize().as_bytes())
}

/// Result of comparing two subtrees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Convergence {
    /// Identical content.
    Converged,
    /// First difference found, depth-first.
    Diverged { path: String, reason: String },
}

impl Convergence {
    pub fn is_converged(&self) -> bool {
        matches!(self, Convergence::Converged)
    }
}

/// Compare the subtree at `left` in one model with `right` in another.
///
/// Walks both trees only when the digests differ, to report where.
pub fn verify_convergence(left_model: &Model, left: NodeKey, right_model: &Model, right: NodeKey) -> Convergence {
    let (Some(a), Some(b)) = (subtree_digest(left_model, left), subtree_digest(right_model, right)) else {
        return Convergence::Diverged {
            path: String::new(),
            reason: "node not found".into(),
        };
    };
    if a == b {
        return Convergence::Converged;
    }
    let path = left_model.type_name(left).unwrap_or_default().to_string();
    first_difference(left_model, left, right_model, right, path).unwrap_or(Convergence::Diverged {
        path: String::new(),
        reason: "state hash mismatch".into(),
    })
}

fn first_difference(
    lm: &Model,
    l: NodeKey,
    rm: &Model,
    r: NodeKey,
    path: String,
) -> Option<Convergence> {
    let diverged = |reason: String| {
        Some(Convergence::Diverged {
            path: path.clone(),
            reason,
        })
    };

    if lm.type_name(l) != rm.type_name(r) {
        return diverged(format!(
            "type mismatch: left={:?}, right={:?}",
            lm.type_name(l),
            rm.type_name(r)
        ));
    }
    if lm.attributes(l) != rm.attributes(r) {
        return diverged("attributes differ".into());
    }
    if lm.is_stub(l) != rm.is_stub(r) || lm.is_dirty(l) != rm.is_dirty(r) {
        return diverged("stub/dirty flags differ".into());
    }
    let (lc, rc) = (lm.children(l), rm.children(r));
    if lc.len() != rc.len() {
        return diverged(format!(
            "child count mismatch: left={}, right={}",
            lc.len(),
            rc.len()
        ));
    }
    lc.iter().zip(rc).enumerate().find_map(|(i, (a, b))| {
        let child_path = format!("{}/{}[{}]", path, lm.type_name(*a).unwrap_or_default(), i);
        first_difference(lm, *a, rm, *b, child_path)
    })
}

fn start() -> blake3::Hasher {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"canopy-tree-v1:");
    hasher
}

fn put_str(hasher: &mut blake3::Hasher, s: &str) {
    hasher.update(&(s.len() as u64).to_be_bytes());
    hasher.update(s.as_bytes());
}

fn put_node(
    hasher: &mut blake3::Hasher,
    type_name: &str,
    attributes: &[(String, String)],
    stub: bool,
    dirty: bool,
    children: usize,
) {
    put_str(hasher, type_name);
    hasher.update(&(attributes.len() as u64).to_be_bytes());
    for (name, value) in attributes {
        put_str(hasher, name);
        put_str(hasher, value);
    }
    hasher.update(&[stub as u8, dirty as u8]);
    hasher.update(&(children as u64).to_be_bytes());
}

fn hash_node(model: &Model, key: NodeKey, hasher: &mut blake3::Hasher) {
    let children = model.children(key);
    put_node(
        hasher,
        model.type_name(key).unwrap_or_default(),
        model.attributes(key),
        model.is_stub(key),
        model.is_dirty(key),
        children.len(),
    );
    for child in children {
        hash_node(model, *child, hasher);
    }
}

fn hash_fragment(fragment: &Fragment, hasher: &mut blake3::Hasher) {
    put_node(
        hasher,
        &fragment.type_name,
        &fragment.attributes,
        fragment.stub,
        fragment.dirty,
        fragment.children.len(),
    );
    for child in &fragment.children {
        hash_fragment(child, hasher);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(model: &mut Model) -> NodeKey {
        let config = model.create_node("config");
        model.set_attribute(config, "mode", "fast").unwrap();
        for id in ["a", "b"] {
            let item = model.create_node("item");
            model.set_attribute(item, "id", id).unwrap();
            model.add_child(config, item, None).unwrap();
        }
        config
    }

    #[test]
    fn test_equal_trees_in_different_models() {
        let mut left = Model::new();
        let mut right = Model::new();
        // Different key allocation on the right.
        right.create_node("padding");
        let l = sample(&mut left);
        let r = sample(&mut right);

        assert_eq!(subtree_digest(&left, l), subtree_digest(&right, r));
        assert!(verify_convergence(&left, l, &right, r).is_converged());
    }

    #[test]
    fn test_fragment_digest_matches_model() {
        let mut model = Model::new();
        let config = sample(&mut model);
        let fragment = model.to_fragment(config).unwrap();
        assert_eq!(Some(fragment_digest(&fragment)), subtree_digest(&model, config));
    }

    #[test]
    fn test_child_order_matters() {
        let mut left = Model::new();
        let mut right = Model::new();
        let l = sample(&mut left);
        let r = sample(&mut right);
        let first = right.children(r)[0];
        right.remove_child(r, first).unwrap();
        right.add_child(r, first, None).unwrap();

        assert_ne!(subtree_digest(&left, l), subtree_digest(&right, r));
        match verify_convergence(&left, l, &right, r) {
            Convergence::Diverged { path, .. } => assert_eq!(path, "config/item[0]"),
            other => panic!("expected divergence, got {:?}", other),
        }
    }

    #[test]
    fn test_attribute_boundaries_do_not_collide() {
        let mut model = Model::new();
        let a = model.create_node("n");
        model.set_attribute(a, "ab", "c").unwrap();
        let b = model.create_node("n");
        model.set_attribute(b, "a", "bc").unwrap();
        assert_ne!(subtree_digest(&model, a), subtree_digest(&model, b));
    }

    #[test]
    fn test_missing_node() {
        let model = Model::new();
        assert!(subtree_digest(&model, NodeKey(999)).is_none());
    }
}
