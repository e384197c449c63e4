//! Unbind: stop receiving updates for a bound tree.
//!
//! Idempotent on both sides. Binds of the same root are counted; the last
//! unbind makes the requester forget its mappings before the request leaves,
//! so deltas still in flight are dropped as unknown. The responder
//! acknowledges unknown ids like known ones.

use std::sync::Arc;
use std::time::Duration;

use canopy_core::{Message, NetworkId};
use canopy_model::NodeKey;
use tracing::debug;

use super::{PendingRequest, Reply};
use crate::error::Result;
use crate::lock;
use crate::peer::Peer;

impl Peer {
    /// Unbind a mirror root with the configured default timeout.
    ///
    /// The local nodes stay in the model; they simply stop being updated.
    /// Unbinding a node that is not mirrored succeeds without a request.
    pub async fn unbind(&self, root: NodeKey) -> Result<()> {
        match self.net_id_of(root) {
            Some(net_id) => self.unbind_net(net_id, self.config().default_timeout()).await,
            None => Ok(()),
        }
    }

    /// Unbind by network id, waiting at most `timeout` for the
    /// acknowledgement.
    pub async fn unbind_net(&self, net_id: NetworkId, timeout: Duration) -> Result<()> {
        let mirror = self.mirror_map();
        let removed = self
            .dispatcher()
            .with_model(move |model| lock(&mirror).unbind(model, net_id))
            .await?;
        if removed > 0 {
            debug!(peer = %self.id(), %net_id, removed, "mirror forgotten");
        }

        let reply = self
            .request(PendingRequest::Unbind, timeout, |correlation| {
                Message::UnbindRequest {
                    correlation,
                    net_id,
                }
            })
            .await?;
        match reply {
            Reply::Unbind => Ok(()),
            other => Err(other.unexpected()),
        }
    }
}

pub(crate) fn respond(peer: &Arc<Peer>, correlation: u32, net_id: NetworkId) {
    super::respond(peer, correlation, move |ctx, peer| {
        if let Ok(root) = peer.responder().resolve(net_id) {
            if peer.responder().unbind(&mut ctx.model, root) {
                debug!(peer = %peer.id(), %net_id, "unbound");
            }
        }
        Ok(Message::UnbindResponse { correlation })
    });
}

pub(crate) fn complete(peer: &Arc<Peer>, correlation: u32) {
    super::complete(peer, correlation, |_, _, _| Ok(Reply::Unbind));
}
