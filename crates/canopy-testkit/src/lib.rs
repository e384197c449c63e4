//! # Canopy Testkit
//!
//! Testing utilities for Canopy.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Known messages with their exact wire bytes
//! - **Generators**: Proptest strategies for trees and mutation scripts
//! - **Fixtures**: Tree builders and connected server/client pairs
//!
//! ## Golden Vectors
//!
//! Golden vectors pin the header and payload layout:
//!
//! ```rust
//! use canopy_testkit::vectors::{all_vectors, verify_all_vectors};
//!
//! for vector in all_vectors() {
//!     println!("{}: {}", vector.name, vector.expected_hex);
//! }
//! assert!(verify_all_vectors().is_empty());
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use canopy_testkit::generators::{mutation_script, tree};
//!
//! proptest! {
//!     #[test]
//!     fn mirrors_converge(base in tree(3), script in mutation_script(20)) {
//!         // serve, bind, apply the script in one job, compare digests;
//!         // canopy/tests/convergence.rs runs this over loopback TCP
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use canopy_testkit::fixtures::Loopback;
//!
//! async fn example() {
//!     let loopback = Loopback::start(|model| {
//!         canopy_testkit::fixtures::wide_config(model);
//!     })
//!     .await;
//!     let (client, peer) = loopback.client().await;
//!     let roots = peer.bind_with("/config", 5, loopback.timeout()).await.unwrap();
//!     # let _ = (client, roots);
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{attach_tree, duplex_pair, eventually, node, random_tree, wide_config, Loopback, TEST_TIMEOUT};
pub use generators::{apply_mutation, mutation_script, tree, Mutation};
pub use vectors::{all_vectors, verify_all_vectors, GoldenVector};
