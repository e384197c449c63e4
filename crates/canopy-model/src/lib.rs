//! # Canopy Model
//!
//! The tree that Canopy replicates. Nodes live in an arena owned by a
//! [`Model`] and are referenced only by stable [`NodeKey`]s, so nothing
//! outside the model ever holds a pointer into the tree.
//!
//! ## Overview
//!
//! - [`Model`] - arena of nodes, mutation API, explicit subscription table
//! - [`ModelListener`] - handler object invoked for queued [`ModelEvent`]s
//! - [`query`] - small path language (`/config/item[@id='3']`, `//item`, `count(...)`)
//! - [`Scope`] / [`Value`] - variable bindings and typed query results
//! - [`ScriptEngine`] - pluggable script runner, with [`BasicEngine`] bundled
//!
//! ## Notifications
//!
//! Mutations never call listeners directly. Each mutation queues one
//! notification per subscriber of the affected node; [`Model::flush`]
//! delivers them in order with `&mut Model` access, so handlers may install
//! or remove subscriptions while they run.
//!
//! ```rust
//! use canopy_model::Model;
//!
//! let mut model = Model::new();
//! let config = model.create_node("config");
//! model.add_child(model.root(), config, None).unwrap();
//! model.set_attribute(config, "mode", "fast").unwrap();
//! model.flush();
//! assert_eq!(model.attribute(config, "mode"), Some("fast"));
//! ```

pub mod error;
pub mod listener;
pub mod model;
pub mod node;
pub mod query;
pub mod script;
pub mod value;

pub use error::{ModelError, Result, ScriptError};
pub use listener::{ModelEvent, ModelListener, SubscriberId};
pub use model::Model;
pub use node::{CachingPolicy, NodeKey};
pub use query::{evaluate, Query};
pub use script::{BasicEngine, ScriptEngine};
pub use value::{Scope, Value};
