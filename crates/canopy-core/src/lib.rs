//! # Canopy Core
//!
//! Pure primitives for Canopy: wire identifiers, tree fragments, the tree
//! codec boundary and message framing.
//!
//! This crate contains no I/O, no sockets and no tree storage. It only
//! describes what travels over the wire and how it is laid out.
//!
//! ## Key Types
//!
//! - [`NetworkId`] - Wire handle of a tree node for the lifetime of a bind
//! - [`Fragment`] - A serializable (possibly stubbed) copy of a subtree
//! - [`WireValue`] - Type-tagged query/variable value
//! - [`Header`] / [`MessageType`] - Variable-length message header
//! - [`Message`] - Decoded protocol message
//!
//! ## Framing
//!
//! ```text
//! +--------+-----------+----------------+------------------+
//! | type:1 | len:1|4   | correlation:4? | payload: len     |
//! +--------+-----------+----------------+------------------+
//! ```
//!
//! The high bit of the type byte selects the 4-byte length form. See [`wire`].

pub mod codec;
pub mod error;
pub mod fragment;
pub mod message;
pub mod payload;
pub mod types;
pub mod wire;

pub use codec::{CborCodec, TreeCodec};
pub use error::{CoreError, Result};
pub use fragment::{Fragment, WireValue};
pub use message::{ErrorCode, Message};
pub use payload::{PayloadReader, PayloadWriter};
pub use types::{NetworkId, SessionId};
pub use wire::{frame, limits, Frame, Header, MessageType, PROTOCOL_VERSION};
