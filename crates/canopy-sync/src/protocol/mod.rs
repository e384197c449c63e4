//! Message handling for every sub-protocol.
//!
//! The reader task hands each decoded message to [`handle`] in stream order.
//! Anything that touches the tree (requests, responses and deltas) becomes a
//! dispatcher job; jobs run in submission order, so the FIFO order of the
//! stream is the order in which the tree sees the changes. Waiters are
//! completed only after their response has been applied.
//!
//! Each sub-module holds both ends of one exchange: the requester API on
//! [`Peer`], the responder job and the completion job.

pub mod bind;
pub mod execute;
pub mod query;
pub mod sync;
pub mod unbind;
pub mod update;

use std::sync::Arc;

use canopy_core::{ErrorCode, Message, WireValue, PROTOCOL_VERSION};
use canopy_model::{ModelError, NodeKey, Value};
use tracing::{debug, trace, warn};

use crate::dispatch::Context;
use crate::error::{Result, SyncError};
use crate::peer::Peer;

/// What a parked waiter asked for; decides how its response is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingRequest {
    Bind,
    Sync { stub: NodeKey },
    Unbind,
    Query,
    Execute,
}

/// An applied response, handed to the waiting caller.
#[derive(Debug)]
pub enum Reply {
    Bind(Vec<NodeKey>),
    Sync(NodeKey),
    Unbind,
    Query(WireValue),
    Execute {
        variables: Vec<(String, Value)>,
        results: Vec<Value>,
    },
}

impl Reply {
    pub(crate) fn unexpected(&self) -> SyncError {
        SyncError::Codec(format!("unexpected reply {:?}", self))
    }
}

/// Route one inbound message. An error return closes the connection.
pub(crate) fn handle(peer: &Arc<Peer>, message: Message) -> Result<()> {
    trace!(peer = %peer.id(), kind = ?message.kind(), "message received");
    match message {
        Message::Version { version } => {
            if version != PROTOCOL_VERSION {
                warn!(peer = %peer.id(), local = PROTOCOL_VERSION, remote = version, "protocol version mismatch");
                let _ = peer.send(Message::Error {
                    correlation: 0,
                    code: ErrorCode::VersionMismatch,
                    message: format!(
                        "protocol version {} not supported (expected {})",
                        version, PROTOCOL_VERSION
                    ),
                    context: String::new(),
                });
                return Err(SyncError::VersionMismatch {
                    local: PROTOCOL_VERSION,
                    peer: version,
                });
            }
            peer.session().set_initialized(true);
        }

        Message::Heartbeat { reply: false } => {
            peer.send(Message::Heartbeat { reply: true })?;
        }
        Message::Heartbeat { reply: true } => {}

        Message::Error {
            correlation: 0,
            code,
            message,
            ..
        } => {
            warn!(peer = %peer.id(), ?code, %message, "connection error reported by peer");
            if code == ErrorCode::VersionMismatch {
                return Err(SyncError::VersionMismatch {
                    local: PROTOCOL_VERSION,
                    peer: 0,
                });
            }
        }
        Message::Error {
            correlation,
            code,
            message,
            context,
        } => {
            let failed = peer.session().fail(
                correlation,
                SyncError::Remote {
                    code,
                    message,
                    context,
                },
            );
            if !failed {
                debug!(peer = %peer.id(), correlation, "error for unknown correlation discarded");
            }
        }

        Message::BindRequest {
            correlation,
            query,
            limit,
        } => bind::respond(peer, correlation, query, limit),
        Message::BindResponse { correlation, roots } => bind::complete(peer, correlation, roots),

        Message::SyncRequest {
            correlation,
            net_id,
        } => sync::respond(peer, correlation, net_id),
        Message::SyncResponse {
            correlation,
            fragment,
        } => sync::complete(peer, correlation, fragment),

        Message::UnbindRequest {
            correlation,
            net_id,
        } => unbind::respond(peer, correlation, net_id),
        Message::UnbindResponse { correlation } => unbind::complete(peer, correlation),

        Message::QueryRequest {
            correlation,
            query,
            limit,
        } => query::respond(peer, correlation, query, limit),
        Message::QueryResponse { correlation, value } => query::complete(peer, correlation, value),

        Message::ExecuteRequest {
            correlation,
            variables,
            script,
        } => execute::respond(peer, correlation, variables, script),
        Message::ExecuteResponse {
            correlation,
            variables,
            results,
        } => execute::complete(peer, correlation, variables, results),

        delta @ (Message::AddChild { .. }
        | Message::RemoveChild { .. }
        | Message::ChangeAttribute { .. }
        | Message::ClearAttribute { .. }
        | Message::ChangeDirty { .. }) => update::apply(peer, delta),
    }
    Ok(())
}

/// Run a responder job on the dispatcher and send its reply, or an `error`
/// carrying the same correlation id if it fails.
pub(crate) fn respond<F>(peer: &Arc<Peer>, correlation: u32, job: F)
where
    F: FnOnce(&mut Context, &Arc<Peer>) -> Result<Message> + Send + 'static,
{
    let owner = peer.clone();
    let submitted = peer.dispatcher().submit(move |ctx| {
        let reply = job(ctx, &owner).unwrap_or_else(|err| {
            debug!(peer = %owner.id(), correlation, error = %err, "request failed");
            error_message(correlation, &err)
        });
        if let Err(err) = owner.send(reply) {
            debug!(peer = %owner.id(), correlation, error = %err, "reply dropped");
        }
    });
    if submitted.is_err() {
        let _ = peer.send(error_message(correlation, &SyncError::Cancelled));
    }
}

/// Apply a response on the dispatcher, then wake its waiter. Responses
/// with no waiter (timed out or cancelled) are discarded.
///
/// Returns whether a waiter was found. A reply whose waiter gave up while
/// the response was being applied is handed to [`abandon`].
pub(crate) fn complete<F>(peer: &Arc<Peer>, correlation: u32, apply: F) -> bool
where
    F: FnOnce(&mut Context, &Arc<Peer>, PendingRequest) -> Result<Reply> + Send + 'static,
{
    let Some(waiter) = peer.session().take(correlation) else {
        debug!(peer = %peer.id(), correlation, "late response discarded");
        return false;
    };
    let owner = peer.clone();
    // If the dispatcher is gone the waiter is dropped and its caller sees
    // the connection as closed.
    let _ = peer.dispatcher().submit(move |ctx| {
        let result = apply(ctx, &owner, waiter.request);
        if let Err(Ok(reply)) = waiter.tx.send(result) {
            abandon(ctx, &owner, reply);
        }
    });
    true
}

/// Undo the lasting effect of a reply nobody received.
fn abandon(ctx: &mut Context, peer: &Arc<Peer>, reply: Reply) {
    if let Reply::Bind(keys) = reply {
        bind::abandon(&ctx.model, peer, &keys);
    }
}

/// Build the `error` message reporting `err` for `correlation`.
pub(crate) fn error_message(correlation: u32, err: &SyncError) -> Message {
    let (message, context) = match err {
        SyncError::Model(ModelError::Script(script)) => {
            (script.message.clone(), script.location.clone())
        }
        SyncError::Remote {
            message, context, ..
        } => (message.clone(), context.clone()),
        other => (other.to_string(), String::new()),
    };
    Message::Error {
        correlation,
        code: err.code(),
        message,
        context,
    }
}
