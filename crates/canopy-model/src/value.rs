//! Typed values and variable scopes.

use std::collections::BTreeMap;

use crate::node::NodeKey;

/// Result of evaluating a query, or the value bound to a variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Ordered node-set.
    Nodes(Vec<NodeKey>),
    Text(String),
    Number(f64),
    Bool(bool),
}

impl Value {
    /// An empty node-set.
    pub fn empty() -> Self {
        Value::Nodes(Vec::new())
    }

    /// Node-set contents, if this is a node-set.
    pub fn as_nodes(&self) -> Option<&[NodeKey]> {
        match self {
            Value::Nodes(nodes) => Some(nodes),
            _ => None,
        }
    }

    /// Truthiness: non-empty node-sets and strings, non-zero numbers.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Nodes(nodes) => !nodes.is_empty(),
            Value::Text(s) => !s.is_empty(),
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Bool(b) => *b,
        }
    }

    /// Short name of the value's type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nodes(_) => "node-set",
            Value::Text(_) => "string",
            Value::Number(_) => "number",
            Value::Bool(_) => "boolean",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<NodeKey>> for Value {
    fn from(nodes: Vec<NodeKey>) -> Self {
        Value::Nodes(nodes)
    }
}

/// Named variable bindings, iterated in name order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    vars: BTreeMap<String, Value>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Bind a variable, returning the previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.vars.insert(name.into(), value.into())
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// A child scope that starts with a copy of these bindings.
    ///
    /// Changes made to the child never leak back.
    pub fn nested(&self) -> Scope {
        self.clone()
    }
}
