//! Bind: replicate the nodes a query selects and keep them live.

use std::sync::Arc;
use std::time::Duration;

use canopy_core::{Fragment, Message, NetworkId};
use canopy_model::{evaluate, Model, ModelError, NodeKey, Value};
use tracing::debug;

use super::{PendingRequest, Reply};
use crate::error::Result;
use crate::peer::Peer;
use crate::replicate::replicate;

impl Peer {
    /// Bind with the configured default limit and timeout.
    pub async fn bind(&self, query: &str) -> Result<Vec<NodeKey>> {
        self.bind_with(query, self.config().default_limit, self.config().default_timeout())
            .await
    }

    /// Bind the nodes `query` selects on the remote tree.
    ///
    /// Returns the local mirror roots, one per selected node, as detached
    /// nodes of the local model. A node this side already mirrors keeps its
    /// key and place; each bind of it needs its own [`Peer::unbind`]. At most `limit` nodes (or one per root if
    /// there are more roots) have their children sent; the rest arrive as
    /// stubs that [`Peer::sync`] expands later.
    pub async fn bind_with(&self, query: &str, limit: u32, timeout: Duration) -> Result<Vec<NodeKey>> {
        let query = query.to_string();
        let reply = self
            .request(PendingRequest::Bind, timeout, |correlation| Message::BindRequest {
                correlation,
                query,
                limit,
            })
            .await?;
        match reply {
            Reply::Bind(roots) => Ok(roots),
            other => Err(other.unexpected()),
        }
    }
}

pub(crate) fn respond(peer: &Arc<Peer>, correlation: u32, query: String, limit: u32) {
    super::respond(peer, correlation, move |ctx, peer| {
        let root = ctx.model.root();
        let nodes = match evaluate(&ctx.model, &query, root, None)? {
            Value::Nodes(nodes) => nodes,
            other => {
                return Err(ModelError::InvalidQuery {
                    query,
                    reason: format!("bind needs a node-set, got {}", other.type_name()),
                }
                .into())
            }
        };

        let replica = replicate(&ctx.model, &nodes, limit as usize, true);
        peer.responder().bind(&mut ctx.model, &replica);
        debug!(
            peer = %peer.id(),
            %query,
            roots = replica.fragments.len(),
            included = replica.included.len(),
            "bound"
        );
        Ok(Message::BindResponse {
            correlation,
            roots: replica.fragments,
        })
    });
}

pub(crate) fn complete(peer: &Arc<Peer>, correlation: u32, roots: Vec<Fragment>) {
    let bound: Vec<NetworkId> = roots.iter().filter_map(|root| root.net_id).collect();
    let delivered = super::complete(peer, correlation, move |ctx, peer, _| {
        let keys = peer.mirror().bind(&mut ctx.model, &roots)?;
        Ok(Reply::Bind(keys))
    });
    if !delivered {
        release(peer, bound);
    }
}

/// Drop a bind that was applied locally after its caller stopped waiting.
pub(crate) fn abandon(model: &Model, peer: &Arc<Peer>, keys: &[NodeKey]) {
    let bound: Vec<NetworkId> = {
        let mut mirror = peer.mirror();
        let bound: Vec<NetworkId> = keys.iter().filter_map(|key| mirror.ids.net(*key)).collect();
        for net_id in &bound {
            mirror.unbind(model, *net_id);
        }
        bound
    };
    release(peer, bound);
}

/// Unbind roots the other side holds for a bind nobody is waiting for.
/// The acknowledgements are discarded.
fn release(peer: &Arc<Peer>, roots: Vec<NetworkId>) {
    for net_id in roots {
        let (correlation, _ack) = peer.session().begin(PendingRequest::Unbind);
        match peer.send(Message::UnbindRequest {
            correlation,
            net_id,
        }) {
            Ok(()) => debug!(peer = %peer.id(), %net_id, "abandoned bind released"),
            Err(err) => {
                peer.session().take(correlation);
                debug!(peer = %peer.id(), %net_id, error = %err, "abandoned bind not released");
            }
        }
    }
}
