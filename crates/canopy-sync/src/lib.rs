//! # Canopy Sync
//!
//! Live replication of tree fragments between peers over one TCP stream.
//!
//! ## Overview
//!
//! A client *binds* a query against a server's tree and receives a partial
//! copy: at most `limit` nodes have their children sent, the rest arrive as
//! stubs. While the bind is live the server forwards every change to the
//! bound nodes, and the client can *sync* a stub to expand it. Either side
//! may also run one-shot *queries* and remote *executions*.
//!
//! ## Key Properties
//!
//! - **Serial**: every tree mutation, local or remote, runs on one
//!   [`Dispatcher`] task, in arrival order
//! - **Multiplexed**: requests carry correlation ids; many may be in flight
//! - **Budgeted**: bind and sync send bounded amounts of tree
//! - **Self-healing**: dials retry on a schedule, idle links are detected
//!   and dropped, and peers can be reattached
//!
//! ## Usage
//!
//! ```rust,no_run
//! use canopy_model::Model;
//! use canopy_sync::{Connector, Dispatcher, RetryConfig, Server, SessionConfig};
//!
//! async fn example() -> canopy_sync::Result<()> {
//!     let server = Server::bind(
//!         "127.0.0.1:0",
//!         Dispatcher::spawn(Model::new()),
//!         SessionConfig::default(),
//!     )
//!     .await?;
//!
//!     let connector = Connector::new(Dispatcher::spawn(Model::new()), SessionConfig::default());
//!     let peer = connector
//!         .connect_with_retry(&server.local_addr().to_string(), RetryConfig::default())
//!         .await?;
//!
//!     let roots = peer.bind("/config").await?;
//!     for root in roots {
//!         peer.unbind(root).await?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Client                              Server
//!   |-------- version ---------------->|
//!   |<------- version -----------------|
//!   |-------- bindRequest(1) --------->|
//!   |<------- bindResponse(1) ---------|
//!   |<------- addChild / change* ------|   (while bound)
//!   |-------- syncRequest(2) --------->|
//!   |<------- syncResponse(2) ---------|
//!   |<------- heartbeat ---------------|   (server writer idle)
//!   |-------- heartbeat(reply) ------->|
//!   |-------- unbindRequest(3) ------->|
//!   |<------- unbindResponse(3) -------|
//! ```

pub mod config;
pub mod connect;
mod connection;
pub mod convergence;
pub mod dispatch;
pub mod error;
pub mod heartbeat;
mod mirror;
pub mod netid;
pub mod peer;
pub mod protocol;
pub mod registry;
pub mod replicate;
mod responder;
pub mod server;
pub mod session;
pub mod transport;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use config::{RetryConfig, Role, SessionConfig};
pub use connect::{ConnectFuture, Connector};
pub use convergence::{fragment_digest, subtree_digest, verify_convergence, Convergence, SubtreeDigest};
pub use dispatch::{Context, Dispatcher};
pub use error::{Result, SyncError};
pub use heartbeat::{Liveness, ReaderIdle};
pub use netid::NetIdMap;
pub use peer::Peer;
pub use protocol::execute::Execution;
pub use registry::{PeerRegistry, RegistryListener};
pub use replicate::{replicate, Replica, Shape};
pub use server::Server;
pub use session::Session;
pub use transport::{BoxStream, Dialer, TcpDialer};

/// Lock a std mutex, ignoring poisoning: none of the guarded tables can be
/// left half-updated by a panicking holder.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
