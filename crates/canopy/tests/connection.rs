//! Handshake, timeouts, liveness and reconnection over loopback TCP.

use std::time::Duration;

use canopy::sync::{Connector, Dispatcher, SyncError};
use canopy::{Model, RetryConfig, SessionConfig};
use canopy_core::{frame, limits, CborCodec, ErrorCode, Message, PROTOCOL_VERSION};
use canopy_testkit::{wide_config, Loopback, TEST_TIMEOUT};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

fn decode_all(mut bytes: &[u8]) -> Vec<Message> {
    let codec = CborCodec::new();
    let mut messages = Vec::new();
    while let Some(f) = frame(bytes, limits::DEFAULT_MAX_FRAME_LEN).unwrap() {
        messages.push(Message::decode(&f, bytes, &codec).unwrap());
        bytes = &bytes[f.total_len..];
    }
    messages
}

async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test]
async fn test_version_mismatch_sends_error_then_closes() {
    let loopback = Loopback::start(|m| {
        wide_config(m);
    })
    .await;
    let mut stream = TcpStream::connect(loopback.addr()).await.unwrap();
    stream.write_all(&[0x01, 0x01, 99]).await.unwrap();

    let mut received = Vec::new();
    tokio::time::timeout(TEST_TIMEOUT, stream.read_to_end(&mut received))
        .await
        .expect("server closes the connection")
        .unwrap();

    let messages = decode_all(&received);
    assert_eq!(
        messages.first(),
        Some(&Message::Version {
            version: PROTOCOL_VERSION
        })
    );
    match messages.get(1) {
        Some(Message::Error {
            correlation, code, ..
        }) => {
            assert_eq!(*correlation, 0);
            assert_eq!(*code, ErrorCode::VersionMismatch);
        }
        other => panic!("expected error frame, got {:?}", other),
    }
    assert!(wait_until(TEST_TIMEOUT, || loopback.server.registry().is_empty()).await);
}

#[tokio::test]
async fn test_garbage_header_closes_connection() {
    let loopback = Loopback::start(|_| {}).await;
    let mut stream = TcpStream::connect(loopback.addr()).await.unwrap();
    stream.write_all(&[0x7f, 0x00]).await.unwrap();

    let mut received = Vec::new();
    tokio::time::timeout(TEST_TIMEOUT, stream.read_to_end(&mut received))
        .await
        .expect("server closes the connection")
        .unwrap();
    assert!(wait_until(TEST_TIMEOUT, || loopback.server.registry().is_empty()).await);
}

#[tokio::test]
async fn test_request_times_out_against_silent_peer() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let silent = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(socket);
    });

    let dispatcher = Dispatcher::spawn(Model::new());
    let peer = Connector::new(dispatcher, SessionConfig::default())
        .connect(&addr)
        .await
        .unwrap();

    let err = peer
        .bind_with("/config", 5, Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Timeout(200)));
    assert!(!err.is_fatal());
    assert!(peer.is_connected());
    assert_eq!(peer.session().pending_count(), 0);
    silent.abort();
}

#[tokio::test]
async fn test_idle_connection_is_dropped_and_unregistered() {
    let config = SessionConfig {
        reader_idle_ms: 200,
        heartbeat: Some(false),
        ..SessionConfig::default()
    };
    let loopback = Loopback::start_with(config, |_| {}).await;
    let mut stream = TcpStream::connect(loopback.addr()).await.unwrap();

    let peer = loopback.server.accept().await.unwrap();
    assert!(loopback.server.registry().is_registered(&peer));

    let mut received = Vec::new();
    tokio::time::timeout(TEST_TIMEOUT, stream.read_to_end(&mut received))
        .await
        .expect("idle connection is closed")
        .unwrap();
    assert!(wait_until(TEST_TIMEOUT, || loopback.server.registry().is_empty()).await);
    assert!(!peer.is_connected());
}

#[tokio::test]
async fn test_heartbeats_keep_quiet_connection_alive() {
    let config = SessionConfig {
        reader_idle_ms: 300,
        writer_idle_ms: 50,
        ..SessionConfig::default()
    };
    let loopback = Loopback::start_with(config.clone(), |_| {}).await;
    let (_client, peer) = loopback.client_with(config).await;

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(peer.is_connected());
    assert_eq!(loopback.server.registry().len(), 1);
}

#[tokio::test]
async fn test_connect_exhausts_retries() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let connector = Connector::new(Dispatcher::spawn(Model::new()), SessionConfig::default());
    let pending = connector.connect_with_retry(&addr, RetryConfig::new(2, [10]));
    match pending.await {
        Err(SyncError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected exhausted retries, got {:?}", other.map(|p| p.id())),
    }
}

#[tokio::test]
async fn test_close_fails_pending_and_reconnect_restores_service() {
    let loopback = Loopback::start(|m| {
        wide_config(m);
    })
    .await;
    let (_client, peer) = loopback.client().await;
    let first = peer.bind("/config").await.unwrap()[0];
    assert_eq!(loopback.server.registry().len(), 1);
    assert!(peer.net_id_of(first).is_some());

    peer.close();
    tokio::time::timeout(TEST_TIMEOUT, peer.closed()).await.unwrap();
    // Binds do not survive the connection.
    assert!(wait_until(TEST_TIMEOUT, || peer.mirrored_count() == 0).await);
    assert!(matches!(peer.bind("/config").await, Err(SyncError::ConnectionClosed)));
    assert!(wait_until(TEST_TIMEOUT, || loopback.server.registry().is_empty()).await);

    peer.reconnect().await.unwrap();
    assert!(peer.is_connected());
    let again = peer.bind("/config").await.unwrap();
    assert_eq!(again.len(), 1);
    assert_ne!(again[0], first);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bind_answered_after_timeout_is_released() {
    let loopback = Loopback::start(|m| {
        wide_config(m);
    })
    .await;
    let (_client, peer) = loopback.client().await;
    let server_peer = loopback.server.accept().await.unwrap();

    // Hold the server's dispatcher so the bind is answered late.
    loopback
        .dispatcher
        .submit(|_| std::thread::sleep(Duration::from_millis(400)))
        .unwrap();
    let err = peer
        .bind_with("/config", 1000, Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Timeout(100)));

    // Once the server has answered, the client gives the bind back.
    loopback.with_model(|_| ()).await;
    assert!(
        wait_until(TEST_TIMEOUT, || {
            server_peer.bound_count() == 0 && peer.session().pending_count() == 0
        })
        .await
    );
    assert_eq!(peer.mirrored_count(), 0);
    assert!(peer.is_connected());
}

#[tokio::test]
async fn test_oversized_reply_fails_only_that_request() {
    let config = SessionConfig {
        max_frame_len: 512,
        ..SessionConfig::default()
    };
    let loopback = Loopback::start_with(config.clone(), |m| {
        wide_config(m);
    })
    .await;
    let (_client, peer) = loopback.client_with(config).await;
    let server_peer = loopback.server.accept().await.unwrap();

    match peer.query_with("/config", 1000, TEST_TIMEOUT).await {
        Err(SyncError::Remote { code, .. }) => assert_eq!(code, ErrorCode::InternalError),
        other => panic!("expected remote error, got {:?}", other),
    }
    match peer.bind_with("/config", 1000, TEST_TIMEOUT).await {
        Err(SyncError::Remote { code, .. }) => assert_eq!(code, ErrorCode::InternalError),
        other => panic!("expected remote error, got {:?}", other),
    }
    assert!(wait_until(TEST_TIMEOUT, || server_peer.bound_count() == 0).await);

    assert!(peer.is_connected());
    let count = peer.query("count(/config/group)").await.unwrap();
    assert_eq!(count, canopy::WireValue::Number(4.0));
}
