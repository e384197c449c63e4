//! Protocol messages and their payload layouts.
//!
//! A [`Message`] is encoded to a complete frame (header + payload) with
//! [`Message::encode`] and rebuilt from a [`Frame`] with [`Message::decode`].
//! Trees inside payloads go through the session's [`TreeCodec`].

use bytes::{Bytes, BytesMut};

use crate::codec::TreeCodec;
use crate::error::{CoreError, Result};
use crate::fragment::{Fragment, WireValue};
use crate::payload::{PayloadReader, PayloadWriter};
use crate::types::NetworkId;
use crate::wire::{Frame, Header, MessageType};

/// Error codes carried by the `Error` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    /// Unknown/unspecified error.
    Unknown = 0,
    /// Protocol version mismatch; the sender closes the connection.
    VersionMismatch = 1,
    /// The request referenced a network id the responder does not know.
    UnknownNetId = 2,
    /// The query could not be parsed or evaluated.
    InvalidQuery = 3,
    /// The remote script failed.
    ExecutionFailed = 4,
    /// The request was malformed.
    InvalidMessage = 5,
    /// Internal error on the peer.
    InternalError = 6,
}

impl ErrorCode {
    /// Convert from the wire value; unknown values map to `Unknown`.
    pub fn from_u16(v: u16) -> Self {
        match v {
            1 => Self::VersionMismatch,
            2 => Self::UnknownNetId,
            3 => Self::InvalidQuery,
            4 => Self::ExecutionFailed,
            5 => Self::InvalidMessage,
            6 => Self::InternalError,
            _ => Self::Unknown,
        }
    }
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Protocol version announcement, sent by both sides on connect.
    Version { version: u8 },

    /// Failure report. Correlation `0` addresses the connection itself.
    Error {
        correlation: u32,
        code: ErrorCode,
        message: String,
        /// Remote context (e.g. the failing script location), may be empty.
        context: String,
    },

    /// Liveness ping (`reply == false`) or its answer.
    Heartbeat { reply: bool },

    /// Subscribe to the elements selected by `query`.
    BindRequest {
        correlation: u32,
        query: String,
        limit: u32,
    },

    /// Replicated query roots.
    BindResponse {
        correlation: u32,
        roots: Vec<Fragment>,
    },

    /// Drop the subscription rooted at `net_id`.
    UnbindRequest { correlation: u32, net_id: NetworkId },

    /// Acknowledges an unbind.
    UnbindResponse { correlation: u32 },

    /// Expand a stub.
    SyncRequest { correlation: u32, net_id: NetworkId },

    /// Current content of the synced node.
    SyncResponse {
        correlation: u32,
        fragment: Fragment,
    },

    /// A child was inserted under a bound element.
    AddChild {
        parent: NetworkId,
        index: u32,
        child: Fragment,
    },

    /// A bound element was removed from its parent.
    RemoveChild { child: NetworkId },

    /// An attribute was set.
    ChangeAttribute {
        net_id: NetworkId,
        name: String,
        value: String,
    },

    /// An attribute was removed.
    ClearAttribute { net_id: NetworkId, name: String },

    /// The dirty flag of a caching-policy node changed.
    ChangeDirty { net_id: NetworkId, dirty: bool },

    /// One-shot remote query.
    QueryRequest {
        correlation: u32,
        query: String,
        limit: u32,
    },

    /// Result of a remote query.
    QueryResponse { correlation: u32, value: WireValue },

    /// Run a script remotely with the given variable bindings.
    ExecuteRequest {
        correlation: u32,
        variables: Vec<(String, WireValue)>,
        script: Fragment,
    },

    /// Variables after execution plus the values the script returned.
    ExecuteResponse {
        correlation: u32,
        variables: Vec<(String, WireValue)>,
        results: Vec<WireValue>,
    },
}

impl Message {
    /// The message type.
    pub fn kind(&self) -> MessageType {
        match self {
            Message::Version { .. } => MessageType::Version,
            Message::Error { .. } => MessageType::Error,
            Message::Heartbeat { .. } => MessageType::Heartbeat,
            Message::BindRequest { .. } => MessageType::BindRequest,
            Message::BindResponse { .. } => MessageType::BindResponse,
            Message::UnbindRequest { .. } => MessageType::UnbindRequest,
            Message::UnbindResponse { .. } => MessageType::UnbindResponse,
            Message::SyncRequest { .. } => MessageType::SyncRequest,
            Message::SyncResponse { .. } => MessageType::SyncResponse,
            Message::AddChild { .. } => MessageType::AddChild,
            Message::RemoveChild { .. } => MessageType::RemoveChild,
            Message::ChangeAttribute { .. } => MessageType::ChangeAttribute,
            Message::ClearAttribute { .. } => MessageType::ClearAttribute,
            Message::ChangeDirty { .. } => MessageType::ChangeDirty,
            Message::QueryRequest { .. } => MessageType::QueryRequest,
            Message::QueryResponse { .. } => MessageType::QueryResponse,
            Message::ExecuteRequest { .. } => MessageType::ExecuteRequest,
            Message::ExecuteResponse { .. } => MessageType::ExecuteResponse,
        }
    }

    /// Correlation id, for correlated message types.
    pub fn correlation(&self) -> Option<u32> {
        match self {
            Message::Error { correlation, .. }
            | Message::BindRequest { correlation, .. }
            | Message::BindResponse { correlation, .. }
            | Message::UnbindRequest { correlation, .. }
            | Message::UnbindResponse { correlation }
            | Message::SyncRequest { correlation, .. }
            | Message::SyncResponse { correlation, .. }
            | Message::QueryRequest { correlation, .. }
            | Message::QueryResponse { correlation, .. }
            | Message::ExecuteRequest { correlation, .. }
            | Message::ExecuteResponse { correlation, .. } => Some(*correlation),
            _ => None,
        }
    }

    /// Encode the full frame: header followed by payload.
    pub fn encode(&self, codec: &dyn TreeCodec) -> Result<Bytes> {
        self.encode_within(codec, u32::MAX as usize)
    }

    /// Encode the full frame, failing with [`CoreError::FrameTooLarge`] when
    /// the payload exceeds `max_len`. Nothing is written in that case, so the
    /// stream stays usable.
    pub fn encode_within(&self, codec: &dyn TreeCodec, max_len: usize) -> Result<Bytes> {
        let payload = self.encode_payload(codec)?;
        let limit = max_len.min(u32::MAX as usize);
        if payload.len() > limit {
            return Err(CoreError::FrameTooLarge {
                length: payload.len(),
                limit,
            });
        }
        let header = Header::new(self.kind(), payload.len(), self.correlation().unwrap_or(0));

        let mut buf = BytesMut::with_capacity(header.encoded_len() + payload.len());
        header.encode(&mut buf);
        buf.extend_from_slice(&payload);
        Ok(buf.freeze())
    }

    fn encode_payload(&self, codec: &dyn TreeCodec) -> Result<Bytes> {
        let mut w = PayloadWriter::new();
        match self {
            Message::Version { version } => w.put_u8(*version),
            Message::Error {
                code,
                message,
                context,
                ..
            } => {
                w.put_u32(u32::from(*code as u16));
                w.put_str(message);
                w.put_str(context);
            }
            Message::Heartbeat { reply } => w.put_bool(*reply),
            Message::BindRequest { query, limit, .. }
            | Message::QueryRequest { query, limit, .. } => {
                w.put_str(query);
                w.put_u32(*limit);
            }
            Message::BindResponse { roots, .. } => {
                w.put_u32(roots.len() as u32);
                for root in roots {
                    w.put_fragment(codec, root)?;
                }
            }
            Message::UnbindRequest { net_id, .. } | Message::SyncRequest { net_id, .. } => {
                w.put_net_id(*net_id);
            }
            Message::UnbindResponse { .. } => {}
            Message::SyncResponse { fragment, .. } => w.put_fragment(codec, fragment)?,
            Message::AddChild {
                parent,
                index,
                child,
            } => {
                w.put_net_id(*parent);
                w.put_u32(*index);
                w.put_fragment(codec, child)?;
            }
            Message::RemoveChild { child } => w.put_net_id(*child),
            Message::ChangeAttribute {
                net_id,
                name,
                value,
            } => {
                w.put_net_id(*net_id);
                w.put_str(name);
                w.put_str(value);
            }
            Message::ClearAttribute { net_id, name } => {
                w.put_net_id(*net_id);
                w.put_str(name);
            }
            Message::ChangeDirty { net_id, dirty } => {
                w.put_net_id(*net_id);
                w.put_bool(*dirty);
            }
            Message::QueryResponse { value, .. } => w.put_value(codec, value)?,
            Message::ExecuteRequest {
                variables, script, ..
            } => {
                w.put_bindings(codec, variables)?;
                w.put_fragment(codec, script)?;
            }
            Message::ExecuteResponse {
                variables, results, ..
            } => {
                w.put_bindings(codec, variables)?;
                w.put_u32(results.len() as u32);
                for result in results {
                    w.put_value(codec, result)?;
                }
            }
        }
        Ok(w.finish())
    }

    /// Decode the message located by `frame` inside `buf`.
    pub fn decode(frame: &Frame, buf: &[u8], codec: &dyn TreeCodec) -> Result<Message> {
        let payload = buf
            .get(frame.payload_range())
            .ok_or(CoreError::Underflow {
                needed: frame.total_len,
                remaining: buf.len(),
            })?;
        let correlation = frame.header.correlation.unwrap_or(0);
        let mut r = PayloadReader::new(payload);

        let message = match frame.header.kind {
            MessageType::Version => Message::Version {
                version: r.get_u8()?,
            },
            MessageType::Error => {
                let raw = r.get_u32()?;
                Message::Error {
                    correlation,
                    code: ErrorCode::from_u16(raw as u16),
                    message: r.get_str()?,
                    context: r.get_str()?,
                }
            }
            MessageType::Heartbeat => Message::Heartbeat {
                reply: r.get_bool()?,
            },
            MessageType::BindRequest => Message::BindRequest {
                correlation,
                query: r.get_str()?,
                limit: r.get_u32()?,
            },
            MessageType::QueryRequest => Message::QueryRequest {
                correlation,
                query: r.get_str()?,
                limit: r.get_u32()?,
            },
            MessageType::BindResponse => {
                let count = r.get_u32()? as usize;
                let mut roots = Vec::with_capacity(count.min(r.remaining() / 4));
                for _ in 0..count {
                    roots.push(r.get_fragment(codec)?);
                }
                Message::BindResponse { correlation, roots }
            }
            MessageType::UnbindRequest => Message::UnbindRequest {
                correlation,
                net_id: r.get_net_id()?,
            },
            MessageType::UnbindResponse => Message::UnbindResponse { correlation },
            MessageType::SyncRequest => Message::SyncRequest {
                correlation,
                net_id: r.get_net_id()?,
            },
            MessageType::SyncResponse => Message::SyncResponse {
                correlation,
                fragment: r.get_fragment(codec)?,
            },
            MessageType::AddChild => Message::AddChild {
                parent: r.get_net_id()?,
                index: r.get_u32()?,
                child: r.get_fragment(codec)?,
            },
            MessageType::RemoveChild => Message::RemoveChild {
                child: r.get_net_id()?,
            },
            MessageType::ChangeAttribute => Message::ChangeAttribute {
                net_id: r.get_net_id()?,
                name: r.get_str()?,
                value: r.get_str()?,
            },
            MessageType::ClearAttribute => Message::ClearAttribute {
                net_id: r.get_net_id()?,
                name: r.get_str()?,
            },
            MessageType::ChangeDirty => Message::ChangeDirty {
                net_id: r.get_net_id()?,
                dirty: r.get_bool()?,
            },
            MessageType::QueryResponse => Message::QueryResponse {
                correlation,
                value: r.get_value(codec)?,
            },
            MessageType::ExecuteRequest => Message::ExecuteRequest {
                correlation,
                variables: r.get_bindings(codec)?,
                script: r.get_fragment(codec)?,
            },
            MessageType::ExecuteResponse => {
                let variables = r.get_bindings(codec)?;
                let count = r.get_u32()? as usize;
                let mut results = Vec::with_capacity(count.min(r.remaining()));
                for _ in 0..count {
                    results.push(r.get_value(codec)?);
                }
                Message::ExecuteResponse {
                    correlation,
                    variables,
                    results,
                }
            }
        };

        r.finish()?;
        Ok(message)
    }
}
