//! One live stream: a reader task and a writer task.
//!
//! ```text
//!   caller / dispatcher ──► LinkSlot ──mpsc──► writer ──► socket
//!                                                 │ done
//!   socket ──► reader ──frame/decode──► protocol::handle ──► dispatcher
//! ```
//!
//! The writer sends `version` first, then queued messages in order, and a
//! heartbeat request whenever it sits idle (if this side pings). The reader
//! extracts complete frames from its buffer and hands them on in stream
//! order. When either side stops, the reader reports the loss to the peer
//! with the generation it was started for; a stale report (the peer already
//! re-attached) is ignored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use bytes::{Bytes, BytesMut};
use canopy_core::{
    frame, CoreError, ErrorCode, Fragment, Message, MessageType, TreeCodec, PROTOCOL_VERSION,
};
use canopy_model::NodeKey;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::heartbeat::{Liveness, ReaderIdle, WriterEvent};
use crate::lock;
use crate::peer::Peer;
use crate::protocol;

const READ_BUFFER: usize = 8 * 1024;

/// Item queued for the writer.
#[derive(Debug)]
pub(crate) enum Outbound {
    Message(Message),
    /// Flush what is queued, then shut the stream down.
    Close,
}

struct Link {
    generation: u64,
    tx: mpsc::UnboundedSender<Outbound>,
}

/// The current outbound channel of a peer, replaced on every (re)attach.
#[derive(Default)]
pub(crate) struct LinkSlot {
    current: Mutex<Option<Link>>,
    generations: AtomicU64,
}

impl LinkSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new outbound channel. Returns its generation.
    pub fn install(&self, tx: mpsc::UnboundedSender<Outbound>) -> u64 {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let previous = lock(&self.current).replace(Link { generation, tx });
        if let Some(previous) = previous {
            let _ = previous.tx.send(Outbound::Close);
        }
        generation
    }

    pub fn send(&self, message: Message) -> Result<()> {
        let current = lock(&self.current);
        let link = current.as_ref().ok_or(SyncError::ConnectionClosed)?;
        link.tx
            .send(Outbound::Message(message))
            .map_err(|_| SyncError::ConnectionClosed)
    }

    /// Ask the current writer to flush and close. The slot is released by
    /// the reader once the stream is down. Returns false if there is no
    /// connection.
    pub fn close(&self) -> bool {
        lock(&self.current)
            .as_ref()
            .is_some_and(|link| link.tx.send(Outbound::Close).is_ok())
    }

    /// Drop the channel if it still belongs to `generation`.
    pub fn release(&self, generation: u64) -> bool {
        let mut current = lock(&self.current);
        match current.as_ref() {
            Some(link) if link.generation == generation => {
                if let Some(link) = current.take() {
                    let _ = link.tx.send(Outbound::Close);
                }
                true
            }
            _ => false,
        }
    }

    pub fn is_open(&self) -> bool {
        lock(&self.current)
            .as_ref()
            .is_some_and(|link| !link.tx.is_closed())
    }
}

/// Start the reader and writer for `stream` on behalf of `peer`.
pub(crate) fn spawn<S>(peer: &Arc<Peer>, stream: S) -> u64
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = tx.send(Outbound::Message(Message::Version {
        version: PROTOCOL_VERSION,
    }));
    let generation = peer.link().install(tx);

    let liveness = Liveness::new(peer.config(), peer.role());
    let (done_tx, done_rx) = oneshot::channel();
    tokio::spawn(write_loop(writer, rx, liveness, Arc::downgrade(peer), done_tx));
    tokio::spawn(read_loop(peer.clone(), reader, liveness, generation, done_rx));
    generation
}

async fn write_loop<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    liveness: Liveness,
    peer: Weak<Peer>,
    done: oneshot::Sender<Option<SyncError>>,
) where
    W: AsyncWrite + Unpin,
{
    let Some((codec, max_frame_len)) = peer
        .upgrade()
        .map(|p| (p.session().codec_arc(), p.config().max_frame_len))
    else {
        let _ = done.send(None);
        return;
    };

    let outcome = loop {
        let message = match liveness.next_outbound(&mut rx).await {
            WriterEvent::Item(Outbound::Message(message)) => message,
            WriterEvent::Ping => Message::Heartbeat { reply: false },
            WriterEvent::Item(Outbound::Close) | WriterEvent::Closed => break None,
        };
        let bytes = match encode(&message, codec.as_ref(), max_frame_len, &peer) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => continue,
            Err(err) => break Some(err),
        };
        if let Err(err) = writer.write_all(&bytes).await {
            break Some(SyncError::Io(err));
        }
        if let Err(err) = writer.flush().await {
            break Some(SyncError::Io(err));
        }
    };
    let _ = writer.shutdown().await;
    let _ = done.send(outcome);
}

/// Encode one outbound message.
///
/// A message the peer would reject as too large is never written. A reply
/// is replaced by an `error` for its correlation id, a request fails its
/// local waiter, and an oversized delta ends the connection since the
/// peer's copy could no longer be kept exact.
fn encode(
    message: &Message,
    codec: &dyn TreeCodec,
    max_frame_len: usize,
    peer: &Weak<Peer>,
) -> Result<Option<Bytes>> {
    let err = match message.encode_within(codec, max_frame_len) {
        Ok(bytes) => return Ok(Some(bytes)),
        Err(err @ CoreError::FrameTooLarge { .. }) => err,
        Err(err) => {
            warn!(kind = ?message.kind(), error = %err, "message could not be encoded");
            return Ok(None);
        }
    };

    let kind = message.kind();
    warn!(?kind, error = %err, "outbound message too large");
    match message.correlation() {
        Some(correlation) if kind.is_response() || kind == MessageType::Error => {
            if let (Message::BindResponse { roots, .. }, Some(peer)) = (message, peer.upgrade()) {
                release_bind(&peer, roots);
            }
            let reply = Message::Error {
                correlation,
                code: ErrorCode::InternalError,
                message: format!("{:?} not sent: {}", kind, err),
                context: String::new(),
            };
            Ok(Some(reply.encode_within(codec, max_frame_len)?))
        }
        Some(correlation) => {
            if let Some(peer) = peer.upgrade() {
                peer.session().fail(correlation, SyncError::from(err));
            }
            Ok(None)
        }
        None => Err(SyncError::from(err)),
    }
}

/// Drop the responder state of a bind whose response was never sent.
fn release_bind(peer: &Arc<Peer>, roots: &[Fragment]) {
    let keys: Vec<NodeKey> = roots
        .iter()
        .filter_map(|root| root.net_id)
        .filter_map(|net| peer.responder().resolve(net).ok())
        .collect();
    let owner = peer.clone();
    let _ = peer.dispatcher().submit(move |ctx| {
        for key in keys {
            owner.responder().unbind(&mut ctx.model, key);
        }
    });
}

async fn read_loop<R>(
    peer: Arc<Peer>,
    mut reader: R,
    liveness: Liveness,
    generation: u64,
    mut writer_done: oneshot::Receiver<Option<SyncError>>,
) where
    R: AsyncRead + Unpin,
{
    let max_frame_len = peer.config().max_frame_len;
    let codec = peer.session().codec_arc();
    let mut buf = BytesMut::with_capacity(READ_BUFFER);

    let reason = 'read: loop {
        loop {
            let found = match frame(&buf, max_frame_len) {
                Ok(Some(found)) => found,
                Ok(None) => break,
                Err(err) => {
                    warn!(peer = %peer.id(), error = %err, "framing error");
                    break 'read SyncError::from(err);
                }
            };
            let bytes = buf.split_to(found.total_len);
            let message = match Message::decode(&found, &bytes, codec.as_ref()) {
                Ok(message) => message,
                Err(err) => {
                    warn!(peer = %peer.id(), error = %err, "undecodable message");
                    break 'read SyncError::from(err);
                }
            };
            if let Err(err) = protocol::handle(&peer, message) {
                break 'read err;
            }
        }

        tokio::select! {
            read = liveness.read(reader.read_buf(&mut buf)) => match read {
                Ok(Ok(0)) => break SyncError::ConnectionClosed,
                Ok(Ok(_)) => {}
                Ok(Err(err)) => break SyncError::Io(err),
                Err(ReaderIdle) => {
                    warn!(peer = %peer.id(), idle_ms = peer.config().reader_idle_ms, "heartbeat timeout");
                    break SyncError::Timeout(peer.config().reader_idle_ms);
                }
            },
            done = &mut writer_done => {
                break done.ok().flatten().unwrap_or(SyncError::ConnectionClosed);
            }
        }
    };

    debug!(peer = %peer.id(), generation, reason = %reason, "connection lost");
    peer.link_lost(generation, reason);
}
