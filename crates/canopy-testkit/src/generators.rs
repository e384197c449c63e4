//! Proptest generators for property-based testing.

use canopy_core::{Fragment, WireValue};
use canopy_model::{Model, NodeKey};
use proptest::prelude::*;

/// Generate a node type name.
pub fn type_name() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("item".to_string()),
        Just("group".to_string()),
        Just("entry".to_string()),
        "[a-z]{1,8}",
    ]
}

/// Generate an attribute name from a small set, so mutations collide.
pub fn attribute_name() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("id".to_string()),
        Just("mode".to_string()),
        Just("value".to_string()),
        Just("label".to_string()),
    ]
}

/// Generate an attribute value, including empty and non-ASCII text.
pub fn attribute_value() -> impl Strategy<Value = String> {
    prop_oneof![Just(String::new()), "[a-z0-9]{1,12}", "\\PC{0,6}"]
}

/// Generate attributes with distinct names.
pub fn attributes() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::btree_map(attribute_name(), attribute_value(), 0..4)
        .prop_map(|map| map.into_iter().collect())
}

/// Generate a tree of at most `depth` levels below the root.
pub fn tree(depth: u32) -> impl Strategy<Value = Fragment> {
    let leaf = (type_name(), attributes()).prop_map(|(type_name, attributes)| Fragment {
        type_name,
        attributes,
        ..Fragment::default()
    });
    leaf.prop_recursive(depth, 64, 6, |inner| {
        (type_name(), attributes(), prop::collection::vec(inner, 0..6)).prop_map(
            |(type_name, attributes, children)| Fragment {
                type_name,
                attributes,
                children,
                ..Fragment::default()
            },
        )
    })
}

/// Generate a query result value.
pub fn wire_value() -> impl Strategy<Value = WireValue> {
    prop_oneof![
        attribute_value().prop_map(WireValue::Text),
        (-1.0e9f64..1.0e9).prop_map(WireValue::Number),
        any::<bool>().prop_map(WireValue::Bool),
        prop::collection::vec(tree(2), 0..3).prop_map(WireValue::Nodes),
    ]
}

/// One change to a bound tree. Targets are indexes into the subtree's
/// pre-order node list, taken modulo its length.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    AddChild { parent: usize, type_name: String },
    Remove { target: usize },
    SetAttribute { target: usize, name: String, value: String },
    ClearAttribute { target: usize, name: String },
    Move { target: usize, parent: usize },
}

/// Generate a single mutation.
pub fn mutation() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        3 => (any::<usize>(), type_name())
            .prop_map(|(parent, type_name)| Mutation::AddChild { parent, type_name }),
        1 => any::<usize>().prop_map(|target| Mutation::Remove { target }),
        4 => (any::<usize>(), attribute_name(), attribute_value())
            .prop_map(|(target, name, value)| Mutation::SetAttribute { target, name, value }),
        1 => (any::<usize>(), attribute_name())
            .prop_map(|(target, name)| Mutation::ClearAttribute { target, name }),
        1 => (any::<usize>(), any::<usize>())
            .prop_map(|(target, parent)| Mutation::Move { target, parent }),
    ]
}

/// Generate up to `max_len` mutations.
pub fn mutation_script(max_len: usize) -> impl Strategy<Value = Vec<Mutation>> {
    prop::collection::vec(mutation(), 0..=max_len)
}

/// Apply `mutation` to the subtree at `root`. Mutations that would be
/// invalid (removing the root, creating a cycle) are skipped.
///
/// Returns whether the tree changed shape or content.
pub fn apply_mutation(model: &mut Model, root: NodeKey, mutation: &Mutation) -> bool {
    let nodes = model.subtree(root);
    let pick = |i: &usize| nodes[*i % nodes.len()];

    match mutation {
        Mutation::AddChild { parent, type_name } => {
            let child = model.create_node(type_name.clone());
            model.add_child(pick(parent), child, None).is_ok()
        }
        Mutation::Remove { target } => {
            let target = pick(target);
            target != root && model.delete(target).is_ok()
        }
        Mutation::SetAttribute { target, name, value } => model
            .set_attribute(pick(target), name, value.clone())
            .is_ok(),
        Mutation::ClearAttribute { target, name } => {
            matches!(model.clear_attribute(pick(target), name), Ok(Some(_)))
        }
        Mutation::Move { target, parent } => {
            let (target, parent) = (pick(target), pick(parent));
            if target == root || model.is_ancestor_or_self(target, parent) {
                return false;
            }
            model.detach(target).is_ok() && model.add_child(parent, target, None).is_ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn prop_mutations_keep_root(base in tree(2), script in mutation_script(30)) {
            let mut model = Model::new();
            let root = model.instantiate(&base);
            for m in &script {
                apply_mutation(&mut model, root, m);
            }
            prop_assert!(model.contains(root));
            prop_assert_eq!(model.parent(root), None);
        }

        #[test]
        fn prop_tree_attribute_names_distinct(base in tree(3)) {
            for node in base.walk_breadth_first() {
                let mut names: Vec<_> = node.attributes.iter().map(|(n, _)| n).collect();
                let total = names.len();
                names.sort();
                names.dedup();
                prop_assert_eq!(names.len(), total);
            }
        }
    }
}
