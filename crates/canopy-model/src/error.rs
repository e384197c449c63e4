//! Error types for the model crate.

use thiserror::Error;

use crate::node::NodeKey;

/// Errors raised by model mutation and query evaluation.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The key does not name a live node.
    #[error("unknown node: {0}")]
    UnknownNode(NodeKey),

    /// The node already has a parent.
    #[error("node {0} is already attached")]
    AlreadyAttached(NodeKey),

    /// Inserting the node would make it its own ancestor.
    #[error("inserting {child} under {parent} would create a cycle")]
    Cycle { parent: NodeKey, child: NodeKey },

    /// The document root cannot be removed or re-parented.
    #[error("the document root cannot be detached")]
    RootDetach,

    /// Query syntax error.
    #[error("invalid query '{query}': {reason}")]
    InvalidQuery { query: String, reason: String },

    /// A query referenced an unbound variable.
    #[error("unbound variable: ${0}")]
    UnboundVariable(String),

    /// Script execution failed.
    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// A script failed, with the location of the failing action.
#[derive(Debug, Clone, Error)]
#[error("{message} (at {location})")]
pub struct ScriptError {
    /// Human-readable failure.
    pub message: String,
    /// Path of the failing action inside the script, e.g. `script/fail[2]`.
    pub location: String,
}

impl ScriptError {
    /// Create a script error.
    pub fn new(message: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: location.into(),
        }
    }
}

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;
