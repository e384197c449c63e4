//! Query: evaluate a query remotely and return its typed value.
//!
//! Node-sets are replicated under the same budget as a bind, but without
//! network ids and without listeners: the result is a snapshot.

use std::sync::Arc;
use std::time::Duration;

use canopy_core::{Message, WireValue};
use canopy_model::{evaluate, Value};

use super::{PendingRequest, Reply};
use crate::error::Result;
use crate::peer::Peer;
use crate::replicate::replicate;

impl Peer {
    /// Query with the configured default limit and timeout.
    pub async fn query(&self, query: &str) -> Result<WireValue> {
        self.query_with(query, self.config().default_limit, self.config().default_timeout())
            .await
    }

    pub async fn query_with(&self, query: &str, limit: u32, timeout: Duration) -> Result<WireValue> {
        let query = query.to_string();
        let reply = self
            .request(PendingRequest::Query, timeout, |correlation| Message::QueryRequest {
                correlation,
                query,
                limit,
            })
            .await?;
        match reply {
            Reply::Query(value) => Ok(value),
            other => Err(other.unexpected()),
        }
    }
}

pub(crate) fn respond(peer: &Arc<Peer>, correlation: u32, query: String, limit: u32) {
    super::respond(peer, correlation, move |ctx, _| {
        let root = ctx.model.root();
        let value = match evaluate(&ctx.model, &query, root, None)? {
            Value::Nodes(nodes) => {
                WireValue::Nodes(replicate(&ctx.model, &nodes, limit as usize, false).fragments)
            }
            Value::Text(s) => WireValue::Text(s),
            Value::Number(n) => WireValue::Number(n),
            Value::Bool(b) => WireValue::Bool(b),
        };
        Ok(Message::QueryResponse { correlation, value })
    });
}

pub(crate) fn complete(peer: &Arc<Peer>, correlation: u32, value: WireValue) {
    super::complete(peer, correlation, move |_, _, _| Ok(Reply::Query(value)));
}
