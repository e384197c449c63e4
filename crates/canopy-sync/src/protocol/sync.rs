//! Sync: expand a stub in place.

use std::sync::Arc;
use std::time::Duration;

use canopy_core::{Fragment, Message, NetworkId};
use canopy_model::NodeKey;

use super::{PendingRequest, Reply};
use crate::error::{Result, SyncError};
use crate::peer::Peer;

impl Peer {
    /// Sync with the configured default timeout.
    pub async fn sync(&self, stub: NodeKey) -> Result<NodeKey> {
        self.sync_with(stub, self.config().default_timeout()).await
    }

    /// Fetch the current content of a mirrored node and splice it in.
    ///
    /// `stub` keeps its key and network id. Its children are replaced.
    pub async fn sync_with(&self, stub: NodeKey, timeout: Duration) -> Result<NodeKey> {
        let net_id = self.net_id_of(stub).ok_or_else(|| {
            SyncError::Model(canopy_model::ModelError::UnknownNode(stub))
        })?;
        let reply = self
            .request(PendingRequest::Sync { stub }, timeout, |correlation| {
                Message::SyncRequest {
                    correlation,
                    net_id,
                }
            })
            .await?;
        match reply {
            Reply::Sync(key) => Ok(key),
            other => Err(other.unexpected()),
        }
    }
}

pub(crate) fn respond(peer: &Arc<Peer>, correlation: u32, net_id: NetworkId) {
    super::respond(peer, correlation, move |ctx, peer| {
        let key = peer.responder().resolve(net_id)?;
        let replica = peer.responder().sync(&mut ctx.model, key);
        // Queued events of the stub describe changes the fragment already
        // carries; deliver them while they are still suppressed.
        ctx.model.flush();
        peer.responder().finish_sync(key);
        let fragment = replica
            .fragments
            .into_iter()
            .next()
            .ok_or(SyncError::UnknownNetId(net_id))?;
        Ok(Message::SyncResponse {
            correlation,
            fragment,
        })
    });
}

pub(crate) fn complete(peer: &Arc<Peer>, correlation: u32, fragment: Fragment) {
    super::complete(peer, correlation, move |ctx, peer, request| {
        let PendingRequest::Sync { stub } = request else {
            return Err(SyncError::Codec(format!(
                "sync response for {:?} request",
                request
            )));
        };
        let key = peer.mirror().sync(&mut ctx.model, stub, &fragment)?;
        Ok(Reply::Sync(key))
    });
}
