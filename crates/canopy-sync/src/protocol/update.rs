//! Update propagation, receiving side.
//!
//! The sending side is the session's responder listener. Deltas are applied
//! on the dispatcher in arrival order; a delta for a network id this side
//! does not mirror (unbound, or below a stub) is dropped.

use std::sync::Arc;

use canopy_core::Message;
use tracing::warn;

use crate::peer::Peer;

pub(crate) fn apply(peer: &Arc<Peer>, delta: Message) {
    let owner = peer.clone();
    let _ = peer.dispatcher().submit(move |ctx| {
        let applied = owner.mirror().apply_update(&mut ctx.model, &delta);
        if let Err(err) = applied {
            warn!(peer = %owner.id(), kind = ?delta.kind(), error = %err, "update could not be applied");
        }
    });
}
