//! # Canopy
//!
//! The unified API for Canopy: live, partial replication of trees between
//! peers over TCP.
//!
//! ## Overview
//!
//! - **Bind**: a client asks for the nodes matching a query and receives a
//!   budgeted copy; deep subtrees arrive as stubs
//! - **Sync**: a stub is expanded on demand
//! - **Updates**: changes to bound nodes are pushed while the bind lives
//! - **Execute**: a script node runs against the remote tree and the
//!   resulting variables come back
//!
//! ## Key Concepts
//!
//! - **Network id**: the owner's name for a node, stable for the node's
//!   lifetime. Mirrors are keyed by it.
//! - **Stub**: a node shipped without children.
//! - **Dispatcher**: the single task that owns a tree; every change to it,
//!   local or remote, is a job in its queue.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use canopy::{CanopyConfig, Client, Server};
//! use canopy::model::Model;
//!
//! async fn example() -> canopy::Result<()> {
//!     let config = CanopyConfig::default();
//!
//!     let mut model = Model::new();
//!     let tree = model.create_node("config");
//!     model.add_child(model.root(), tree, None)?;
//!     let server = Server::start(model, &config).await?;
//!
//!     let client = Client::new(Model::new(), &config);
//!     let peer = client.connect(&server.local_addr().to_string()).await?;
//!     let roots = peer.bind("/config").await?;
//!
//!     // Changes on the server now reach the client's mirror.
//!     server
//!         .with_model(move |model| model.set_attribute(tree, "mode", "fast"))
//!         .await??;
//!
//!     peer.unbind(roots[0]).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `canopy::core` - Wire primitives (Message, Fragment, framing)
//! - `canopy::model` - The tree, queries and scripts
//! - `canopy::sync` - Protocol, sessions and connection management

pub mod blocking;
pub mod config;
pub mod endpoint;
pub mod error;

// Re-export component crates
pub use canopy_core as core;
pub use canopy_model as model;
pub use canopy_sync as sync;

// Re-export main types for convenience
pub use blocking::BlockingClient;
pub use config::CanopyConfig;
pub use endpoint::{Client, Server};
pub use error::{CanopyError, Result};

// Re-export commonly used component types
pub use canopy_core::{Fragment, NetworkId, WireValue};
pub use canopy_model::{Model, NodeKey, Scope, Value};
pub use canopy_sync::{
    subtree_digest, verify_convergence, Convergence, Peer, RetryConfig, SessionConfig,
    SubtreeDigest, SyncError,
};

/// Install a `tracing` subscriber that prints to stderr, filtered by
/// `RUST_LOG` (default `info`).
///
/// Returns `false` if a global subscriber was already set.
pub fn init_tracing() -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}
