//! Integration tests for the transport channel
//!
//! Covers the connection state machine against the in-memory dialer and against
//! a real local WebSocket server.

use camcast_core::*;
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

fn memory_channel(config: ConnectionConfig) -> (TransportChannel, MemoryDialer) {
    let dialer = MemoryDialer::new();
    let channel = TransportChannel::with_dialer(config, Arc::new(dialer.clone()));
    (channel, dialer)
}

/// Accepts WebSocket clients and forwards every received message
async fn spawn_sink_server() -> (SocketAddr, mpsc::UnboundedReceiver<Message>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    let _ = tx.send(message);
                }
            });
        }
    });

    (addr, rx)
}

async fn next_event(events: &mut tokio::sync::broadcast::Receiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_connect_send_disconnect_real_server() {
    let (addr, mut received) = spawn_sink_server().await;
    let channel = TransportChannel::new(ConnectionConfig::lan());
    let mut events = channel.subscribe_events();

    let address = format!("ws://{}", addr);
    channel.connect(&address).unwrap();
    assert!(matches!(next_event(&mut events).await, TransportEvent::Connecting { .. }));
    assert!(matches!(next_event(&mut events).await, TransportEvent::Connected { .. }));
    assert!(channel.is_connected());
    assert_eq!(channel.address().as_deref(), Some(address.as_str()));

    assert!(channel.send(Payload::Text("data:image/jpeg;base64,AAAA".to_string())));
    assert!(channel.send(Payload::Binary(bytes::Bytes::from_static(&[0xff, 0xd8, 0xff]))));

    let first = tokio::time::timeout(WAIT, received.recv()).await.unwrap().unwrap();
    assert_eq!(first, Message::Text("data:image/jpeg;base64,AAAA".to_string()));
    let second = tokio::time::timeout(WAIT, received.recv()).await.unwrap().unwrap();
    assert_eq!(second, Message::Binary(vec![0xff, 0xd8, 0xff]));

    channel.disconnect();
    assert_eq!(channel.state(), ConnectionState::Disconnected);
    assert!(matches!(
        next_event(&mut events).await,
        TransportEvent::Closed { initiated_locally: true, .. }
    ));

    let close = tokio::time::timeout(WAIT, received.recv()).await.unwrap().unwrap();
    assert!(close.is_close());

    let stats = channel.stats();
    assert_eq!(stats.connection_attempts, 1);
    assert_eq!(stats.successful_connections, 1);
    assert_eq!(stats.payloads_sent, 2);
}

#[tokio::test]
async fn test_connection_refused_returns_to_disconnected() {
    // Grab a free port and release it so nothing is listening there.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let channel = TransportChannel::new(ConnectionConfig::lan());
    let mut events = channel.subscribe_events();
    channel.connect(&format!("ws://{}", addr)).unwrap();

    assert!(matches!(next_event(&mut events).await, TransportEvent::Connecting { .. }));
    match next_event(&mut events).await {
        TransportEvent::Failed { reason, .. } => assert!(!reason.is_empty()),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(channel.state(), ConnectionState::Disconnected);
    assert_eq!(channel.stats().failed_connections, 1);
}

#[tokio::test]
async fn test_invalid_address_never_dials() {
    let (channel, dialer) = memory_channel(ConnectionConfig::default());

    let err = channel.connect("localhost:9000").unwrap_err();
    assert!(matches!(err, CamcastError::InvalidAddress { .. }));
    assert_eq!(channel.state(), ConnectionState::Disconnected);
    assert_eq!(dialer.dial_count(), 0);
    assert_eq!(channel.stats().connection_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_state_reached_or_timed_out() {
    let (channel, _dialer) = memory_channel(ConnectionConfig::default());

    tokio_test::assert_ok!(
        channel
            .wait_for_state(ConnectionState::Disconnected, WAIT)
            .await
    );

    let err = channel
        .wait_for_state(ConnectionState::Connected, Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, CamcastError::Timeout { .. }));
}

#[tokio::test]
async fn test_send_only_when_connected() {
    let (channel, dialer) = memory_channel(ConnectionConfig::default());
    dialer.set_dial_delay(Some(Duration::from_millis(50)));

    channel.connect("ws://localhost:9000").unwrap();
    assert_eq!(channel.state(), ConnectionState::Connecting);
    for _ in 0..3 {
        assert!(!channel.send(Payload::Text("frame".to_string())));
    }

    channel
        .wait_for_state(ConnectionState::Connected, WAIT)
        .await
        .unwrap();
    assert!(channel.send(Payload::Text("frame".to_string())));

    tokio::task::yield_now().await;
    let peer = dialer.last_peer().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(peer.received(), vec![Message::Text("frame".to_string())]);

    let stats = channel.stats();
    assert_eq!(stats.send_failures, 3);
    assert_eq!(stats.payloads_sent, 1);
}

#[tokio::test]
async fn test_reconnect_replaces_existing_connection() {
    let (channel, dialer) = memory_channel(ConnectionConfig::default());

    let first_id = channel.connect("ws://localhost:9000").unwrap();
    channel
        .wait_for_state(ConnectionState::Connected, WAIT)
        .await
        .unwrap();

    let second_id = channel.connect("ws://localhost:9001").unwrap();
    assert_ne!(first_id, second_id);
    channel
        .wait_for_state(ConnectionState::Connected, WAIT)
        .await
        .unwrap();

    assert_eq!(dialer.dial_count(), 2);
    assert_eq!(channel.address().as_deref(), Some("ws://localhost:9001"));
    assert_eq!(channel.connection_id(), Some(second_id));

    assert!(channel.send(Payload::Text("only-second".to_string())));
    tokio::time::sleep(Duration::from_millis(10)).await;

    let peers = dialer.peers();
    assert!(peers[0].received().is_empty());
    assert_eq!(
        peers[1].received(),
        vec![Message::Text("only-second".to_string())]
    );
}

#[tokio::test]
async fn test_remote_close_is_reported() {
    let (channel, dialer) = memory_channel(ConnectionConfig::default());
    let mut state = channel.subscribe_state();

    channel.connect("ws://localhost:9000").unwrap();
    channel
        .wait_for_state(ConnectionState::Connected, WAIT)
        .await
        .unwrap();

    let mut events = channel.subscribe_events();
    dialer.last_peer().unwrap().close();

    match next_event(&mut events).await {
        TransportEvent::Closed {
            initiated_locally, ..
        } => assert!(!initiated_locally),
        other => panic!("expected close, got {:?}", other),
    }
    state
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await
        .unwrap();
    assert!(!channel.send(Payload::Text("late".to_string())));
    // No automatic reconnect.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(dialer.dial_count(), 1);
}

#[tokio::test]
async fn test_network_error_is_reported() {
    let (channel, dialer) = memory_channel(ConnectionConfig::default());
    channel.connect("ws://localhost:9000").unwrap();
    channel
        .wait_for_state(ConnectionState::Connected, WAIT)
        .await
        .unwrap();

    let mut events = channel.subscribe_events();
    dialer.last_peer().unwrap().fail("reset by peer");

    match next_event(&mut events).await {
        TransportEvent::Failed { reason, .. } => assert!(reason.contains("reset by peer")),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(channel.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_connecting_cancels_attempt() {
    let (channel, dialer) = memory_channel(ConnectionConfig::default());
    dialer.set_dial_delay(Some(Duration::from_secs(2)));

    channel.connect("ws://localhost:9000").unwrap();
    tokio::task::yield_now().await;
    channel.disconnect();
    assert_eq!(channel.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(channel.state(), ConnectionState::Disconnected);
    assert!(dialer.peers().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout() {
    let config = ConnectionConfig {
        timeout: Duration::from_secs(1),
        ..ConnectionConfig::default()
    };
    let (channel, dialer) = memory_channel(config);
    dialer.set_dial_delay(Some(Duration::from_secs(30)));
    let mut events = channel.subscribe_events();

    channel.connect("ws://localhost:9000").unwrap();
    assert!(matches!(next_event(&mut events).await, TransportEvent::Connecting { .. }));
    match next_event(&mut events).await {
        TransportEvent::Failed { reason, .. } => assert!(reason.contains("timed out")),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(channel.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_full_send_queue_rejects_payloads() {
    let config = ConnectionConfig {
        send_queue_capacity: 2,
        ..ConnectionConfig::default()
    };
    let (channel, dialer) = memory_channel(config);
    dialer.stall_new_peers(true);

    channel.connect("ws://localhost:9000").unwrap();
    channel
        .wait_for_state(ConnectionState::Connected, WAIT)
        .await
        .unwrap();

    let accepted = (0..10)
        .filter(|i| channel.send(Payload::Text(format!("frame-{}", i))))
        .count();
    // Queue capacity plus at most one payload held by the stalled writer.
    assert!((2..=3).contains(&accepted), "accepted {}", accepted);
    assert!(!channel.send(Payload::Text("overflow".to_string())));
    assert!(channel.stats().send_failures >= 7);
}

/// Connect to a peer that never reads and leave one write pending
async fn stalled_connection() -> (TransportChannel, Arc<MemoryPeer>) {
    let (channel, dialer) = memory_channel(ConnectionConfig::default());
    dialer.stall_new_peers(true);

    channel.connect("ws://localhost:9000").unwrap();
    channel
        .wait_for_state(ConnectionState::Connected, WAIT)
        .await
        .unwrap();
    let peer = dialer.last_peer().unwrap();

    assert!(channel.send(Payload::Text("frame".to_string())));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(peer.push(Message::Text("socket open".to_string())));
    (channel, peer)
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_releases_stalled_socket() {
    let (channel, peer) = stalled_connection().await;

    channel.disconnect();
    assert_eq!(channel.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!peer.push(Message::Text("after disconnect".to_string())));
    assert!(peer.received().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_releases_stalled_socket() {
    let (channel, peer) = stalled_connection().await;

    channel.connect("ws://localhost:9001").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!peer.push(Message::Text("after reconnect".to_string())));
    assert!(channel.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_drop_releases_stalled_socket() {
    let (channel, peer) = stalled_connection().await;

    drop(channel);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!peer.push(Message::Text("after drop".to_string())));
}

#[tokio::test]
async fn test_connection_state_serialization() {
    let state = ConnectionState::Connected;
    let serialized = serde_json::to_string(&state).unwrap();
    let deserialized: ConnectionState = serde_json::from_str(&serialized).unwrap();
    assert_eq!(state, deserialized);
    tokio_test::assert_ok!(validate_address("ws://localhost:9000"));
}
