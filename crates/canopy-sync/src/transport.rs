//! Dialing abstraction.
//!
//! The connection manager only needs "give me a byte stream to this
//! address". TCP is the production dialer; the in-memory network lets tests
//! control exactly when dials fail or succeed.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Any full-duplex byte stream a peer can run on.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// A boxed stream returned by a [`Dialer`].
pub type BoxStream = Box<dyn Stream>;

/// Opens outbound streams.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Make one connection attempt to `addr`.
    async fn dial(&self, addr: &str) -> std::io::Result<BoxStream>;
}

/// Plain TCP with Nagle disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: &str) -> std::io::Result<BoxStream> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

/// Host part of `host:port`, or the whole string if it has no port.
pub fn host_of(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &rest[..end];
        }
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => host,
        _ => addr,
    }
}

/// An in-memory transport for testing.
///
/// Streams are `tokio::io::duplex` pairs handed to whoever listens on the
/// dialed name.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc;

    use crate::lock;

    const BUFFER: usize = 64 * 1024;

    /// Shared name table of the in-memory network.
    #[derive(Default)]
    pub struct MemoryNetwork {
        listeners: Mutex<HashMap<String, mpsc::UnboundedSender<DuplexStream>>>,
    }

    impl MemoryNetwork {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Start accepting dials to `name`.
        pub fn listen(&self, name: &str) -> MemoryListener {
            let (tx, rx) = mpsc::unbounded_channel();
            lock(&self.listeners).insert(name.to_string(), tx);
            MemoryListener { rx }
        }

        /// Stop accepting dials to `name`.
        pub fn unlisten(&self, name: &str) {
            lock(&self.listeners).remove(name);
        }

        /// A dialer connected to this network.
        pub fn dialer(self: &Arc<Self>) -> MemoryDialer {
            MemoryDialer {
                network: self.clone(),
            }
        }
    }

    /// Accepting side of a name.
    pub struct MemoryListener {
        rx: mpsc::UnboundedReceiver<DuplexStream>,
    }

    impl MemoryListener {
        /// Next dialed stream, or `None` once the name is unlistened.
        pub async fn accept(&mut self) -> Option<DuplexStream> {
            self.rx.recv().await
        }
    }

    /// Dials names on a [`MemoryNetwork`].
    #[derive(Clone)]
    pub struct MemoryDialer {
        network: Arc<MemoryNetwork>,
    }

    #[async_trait]
    impl Dialer for MemoryDialer {
        async fn dial(&self, addr: &str) -> io::Result<BoxStream> {
            let refused = || io::Error::new(io::ErrorKind::ConnectionRefused, addr.to_string());
            let listener = lock(&self.network.listeners)
                .get(addr)
                .cloned()
                .ok_or_else(refused)?;
            let (local, remote) = tokio::io::duplex(BUFFER);
            listener.send(remote).map_err(|_| refused())?;
            Ok(Box::new(local))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryNetwork;
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("127.0.0.1:7000"), "127.0.0.1");
        assert_eq!(host_of("example.org:80"), "example.org");
        assert_eq!(host_of("[::1]:7000"), "::1");
        assert_eq!(host_of("localhost"), "localhost");
    }

    #[tokio::test]
    async fn test_memory_dial_and_refuse() {
        let network = MemoryNetwork::new();
        let dialer = network.dialer();
        assert_eq!(
            dialer.dial("svc").await.err().map(|e| e.kind()),
            Some(std::io::ErrorKind::ConnectionRefused)
        );

        let mut listener = network.listen("svc");
        let mut client = dialer.dial("svc").await.unwrap();
        let mut server = listener.accept().await.unwrap();

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }
}
