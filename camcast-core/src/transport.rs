//! WebSocket transport channel with explicit connection state
//!
//! The channel owns at most one outbound connection. Each connection runs in its
//! own task that forwards queued payloads to the socket and watches the socket
//! for close/error signals. Every connection carries a generation number so a
//! superseded task can never change the state of its successor.

use crate::dialer::{Dialer, Socket, WebSocketDialer};
use crate::error::{CamcastError, CamcastResult};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tungstenite::http::Uri;
use tungstenite::Message;
use uuid::Uuid;

/// Bound on the graceful close handshake of an open connection
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Open and able to send
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Connected => "Connected",
        };
        f.write_str(label)
    }
}

/// Opaque payload handed to the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Sent as a text frame
    Text(String),
    /// Sent as a binary frame
    Binary(Bytes),
}

impl Payload {
    /// Payload size in bytes
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Binary(data) => data.len(),
        }
    }

    /// Whether the payload carries no data
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn into_message(self) -> Message {
        match self {
            Payload::Text(text) => Message::Text(text),
            Payload::Binary(data) => Message::Binary(data.to_vec()),
        }
    }
}

/// Lifecycle notifications published by the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connection attempt started
    Connecting {
        /// Connection identifier
        connection_id: Uuid,
        /// Target endpoint
        address: String,
    },
    /// The handshake completed
    Connected {
        /// Connection identifier
        connection_id: Uuid,
        /// Target endpoint
        address: String,
    },
    /// The connection closed
    Closed {
        /// Connection identifier
        connection_id: Uuid,
        /// Target endpoint
        address: String,
        /// True when closed through `disconnect`/`connect`
        initiated_locally: bool,
    },
    /// The connection could not be established or broke
    Failed {
        /// Connection identifier
        connection_id: Uuid,
        /// Target endpoint
        address: String,
        /// Failure description
        reason: String,
    },
}

/// Connection configuration
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionConfig {
    /// Bound on connection establishment
    pub timeout: Duration,
    /// Payloads that may wait for the socket before `send` starts failing
    pub send_queue_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            send_queue_capacity: 32,
        }
    }
}

impl ConnectionConfig {
    /// Endpoint on the local network
    pub fn lan() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            send_queue_capacity: 16,
        }
    }

    /// Endpoint across the internet
    pub fn remote() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            send_queue_capacity: 64,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> CamcastResult<()> {
        if self.timeout.is_zero() {
            return Err(CamcastError::InvalidConfiguration {
                field: "connection.timeout".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.send_queue_capacity == 0 {
            return Err(CamcastError::InvalidConfiguration {
                field: "connection.send_queue_capacity".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Channel counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    /// Calls to `connect` that passed address validation
    pub connection_attempts: u32,
    /// Handshakes that completed
    pub successful_connections: u32,
    /// Attempts that failed or timed out
    pub failed_connections: u32,
    /// Payloads accepted by `send`
    pub payloads_sent: u64,
    /// Bytes accepted by `send`
    pub bytes_queued: u64,
    /// Calls to `send` that returned false
    pub send_failures: u64,
}

/// Check that `address` is a usable WebSocket endpoint
pub fn validate_address(address: &str) -> CamcastResult<()> {
    let invalid = |reason: String| CamcastError::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    if !(address.starts_with("ws://") || address.starts_with("wss://")) {
        return Err(invalid("expected a ws:// or wss:// scheme".to_string()));
    }

    let uri: Uri = address.parse().map_err(|e| invalid(format!("{}", e)))?;
    match uri.host() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(invalid("missing host".to_string())),
    }
}

#[derive(Debug)]
struct ChannelShared {
    state: ConnectionState,
    address: Option<String>,
    connection_id: Option<Uuid>,
    generation: u64,
    outbound: Option<mpsc::Sender<Payload>>,
    // Dropping or firing it makes the connection task let go of the socket.
    close_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    stats: ChannelStats,
}

struct ChannelInner {
    dialer: Arc<dyn Dialer>,
    config: ConnectionConfig,
    shared: Mutex<ChannelShared>,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: broadcast::Sender<TransportEvent>,
}

impl ChannelInner {
    fn publish(&self, shared: &ChannelShared, event: TransportEvent) {
        self.state_tx.send_replace(shared.state);
        let _ = self.event_tx.send(event);
    }
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        let shared = self.shared.get_mut();
        shared.outbound = None;
        shared.close_tx = None;
        if let Some(task) = shared.task.take() {
            if shared.state == ConnectionState::Connecting {
                task.abort();
            }
        }
    }
}

enum ConnectionEnd {
    ClosedLocally,
    ClosedRemotely,
    Failed(String),
}

/// Single outbound connection with observable state
///
/// Cloning yields another handle to the same channel. `connect` spawns a task and
/// must be called from within a tokio runtime.
#[derive(Clone)]
pub struct TransportChannel {
    inner: Arc<ChannelInner>,
}

impl std::fmt::Debug for TransportChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.inner.shared.lock();
        f.debug_struct("TransportChannel")
            .field("state", &shared.state)
            .field("address", &shared.address)
            .field("generation", &shared.generation)
            .finish()
    }
}

impl Default for TransportChannel {
    fn default() -> Self {
        Self::new(ConnectionConfig::default())
    }
}

impl TransportChannel {
    /// Create a channel that dials real WebSocket endpoints
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_dialer(config, Arc::new(WebSocketDialer))
    }

    /// Create a channel with a custom dialer
    pub fn with_dialer(config: ConnectionConfig, dialer: Arc<dyn Dialer>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(64);

        Self {
            inner: Arc::new(ChannelInner {
                dialer,
                config,
                shared: Mutex::new(ChannelShared {
                    state: ConnectionState::Disconnected,
                    address: None,
                    connection_id: None,
                    generation: 0,
                    outbound: None,
                    close_tx: None,
                    task: None,
                    stats: ChannelStats::default(),
                }),
                state_tx,
                event_tx,
            }),
        }
    }

    /// Open a connection to `address`, replacing any existing one
    pub fn connect(&self, address: &str) -> CamcastResult<Uuid> {
        let address = address.trim();
        let mut shared = self.inner.shared.lock();

        if shared.state != ConnectionState::Disconnected {
            debug!("Replacing existing connection before connecting to {}", address);
            self.teardown(&mut shared);
        }

        if let Err(e) = validate_address(address) {
            warn!("Rejected endpoint: {}", e);
            return Err(e);
        }

        let connection_id = Uuid::new_v4();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.inner.config.send_queue_capacity);
        let (close_tx, close_rx) = oneshot::channel();

        shared.generation += 1;
        shared.state = ConnectionState::Connecting;
        shared.address = Some(address.to_string());
        shared.connection_id = Some(connection_id);
        shared.outbound = Some(outbound_tx);
        shared.close_tx = Some(close_tx);
        shared.stats.connection_attempts += 1;

        info!("Connecting to {} ({})", address, connection_id);

        let task = tokio::spawn(run_connection(
            Arc::downgrade(&self.inner),
            self.inner.dialer.clone(),
            address.to_string(),
            shared.generation,
            connection_id,
            self.inner.config.timeout,
            outbound_rx,
            close_rx,
        ));
        shared.task = Some(task);

        self.inner.publish(
            &shared,
            TransportEvent::Connecting {
                connection_id,
                address: address.to_string(),
            },
        );

        Ok(connection_id)
    }

    /// Close the active connection, if any
    pub fn disconnect(&self) {
        let mut shared = self.inner.shared.lock();
        if shared.state == ConnectionState::Disconnected {
            return;
        }
        self.teardown(&mut shared);
    }

    fn teardown(&self, shared: &mut ChannelShared) {
        let was_connecting = shared.state == ConnectionState::Connecting;

        shared.generation += 1;
        shared.state = ConnectionState::Disconnected;
        shared.outbound = None;
        // Also reaches a task stuck writing to a peer that stopped reading.
        if let Some(close_tx) = shared.close_tx.take() {
            let _ = close_tx.send(());
        }
        if let Some(task) = shared.task.take() {
            if was_connecting {
                task.abort();
            }
        }

        let address = shared.address.clone().unwrap_or_default();
        let connection_id = shared.connection_id.unwrap_or_default();
        info!("Disconnected from {}", address);

        self.inner.publish(
            shared,
            TransportEvent::Closed {
                connection_id,
                address,
                initiated_locally: true,
            },
        );
    }

    /// Queue `payload` for transmission
    ///
    /// Returns false when the channel is not connected or the payload cannot be
    /// queued. Never blocks.
    pub fn send(&self, payload: Payload) -> bool {
        let mut shared = self.inner.shared.lock();

        if shared.state != ConnectionState::Connected {
            shared.stats.send_failures += 1;
            debug!("Dropping payload: not connected ({})", shared.state);
            return false;
        }

        let Some(outbound) = shared.outbound.as_ref() else {
            shared.stats.send_failures += 1;
            return false;
        };

        let len = payload.len() as u64;
        match outbound.try_send(payload) {
            Ok(()) => {
                shared.stats.payloads_sent += 1;
                shared.stats.bytes_queued += len;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                shared.stats.send_failures += 1;
                debug!("Dropping payload: send queue full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                shared.stats.send_failures += 1;
                debug!("Dropping payload: connection task gone");
                false
            }
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    /// Whether the channel can send
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Address of the current or most recent connection
    pub fn address(&self) -> Option<String> {
        self.inner.shared.lock().address.clone()
    }

    /// Identifier of the current or most recent connection
    pub fn connection_id(&self) -> Option<Uuid> {
        self.inner.shared.lock().connection_id
    }

    /// Get channel counters
    pub fn stats(&self) -> ChannelStats {
        self.inner.shared.lock().stats.clone()
    }

    /// Get the channel configuration
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Watch connection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Subscribe to lifecycle events
    pub fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Wait until the channel reaches `target`, up to `timeout`
    pub async fn wait_for_state(
        &self,
        target: ConnectionState,
        timeout: Duration,
    ) -> CamcastResult<()> {
        let mut rx = self.subscribe_state();
        let reached = tokio::time::timeout(timeout, rx.wait_for(|state| *state == target))
            .await
            .map(|result| result.map(|_| ()));
        match reached {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(CamcastError::Transport {
                reason: "channel dropped".to_string(),
            }),
            Err(_) => Err(CamcastError::Timeout {
                operation: format!("waiting for {:?}", target),
                duration: timeout,
            }),
        }
    }
}

async fn run_connection(
    inner: Weak<ChannelInner>,
    dialer: Arc<dyn Dialer>,
    address: String,
    generation: u64,
    connection_id: Uuid,
    timeout: Duration,
    mut outbound: mpsc::Receiver<Payload>,
    mut close_rx: oneshot::Receiver<()>,
) {
    let socket = match tokio::time::timeout(timeout, dialer.dial(&address)).await {
        Ok(Ok(socket)) => socket,
        Ok(Err(e)) => {
            finish(&inner, generation, ConnectionEnd::Failed(e.to_string()));
            return;
        }
        Err(_) => {
            let e = CamcastError::Timeout {
                operation: format!("connect to {}", address),
                duration: timeout,
            };
            finish(&inner, generation, ConnectionEnd::Failed(e.to_string()));
            return;
        }
    };

    let Socket {
        mut sink,
        mut stream,
    } = socket;

    if !mark_connected(&inner, generation) {
        debug!("Connection {} superseded during handshake", connection_id);
        let _ = sink.close().await;
        return;
    }

    let end = loop {
        tokio::select! {
            _ = &mut close_rx => {
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
                break ConnectionEnd::ClosedLocally;
            }
            payload = outbound.recv() => match payload {
                Some(payload) => {
                    tokio::select! {
                        sent = sink.send(payload.into_message()) => {
                            if let Err(e) = sent {
                                break ConnectionEnd::Failed(format!("send failed: {}", e));
                            }
                        }
                        _ = &mut close_rx => {
                            debug!("Connection {} closed with a write pending", connection_id);
                            break ConnectionEnd::ClosedLocally;
                        }
                    }
                }
                None => {
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
                    break ConnectionEnd::ClosedLocally;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(frame))) => {
                    debug!("Remote closed connection {}: {:?}", connection_id, frame);
                    break ConnectionEnd::ClosedRemotely;
                }
                // Inbound application data is not consumed.
                Some(Ok(_)) => {}
                Some(Err(e)) => break ConnectionEnd::Failed(e.to_string()),
                None => break ConnectionEnd::ClosedRemotely,
            },
        }
    };

    finish(&inner, generation, end);
}

fn mark_connected(inner: &Weak<ChannelInner>, generation: u64) -> bool {
    let Some(inner) = inner.upgrade() else {
        return false;
    };
    let mut shared = inner.shared.lock();
    if shared.generation != generation || shared.state != ConnectionState::Connecting {
        return false;
    }

    shared.state = ConnectionState::Connected;
    shared.stats.successful_connections += 1;

    let address = shared.address.clone().unwrap_or_default();
    let connection_id = shared.connection_id.unwrap_or_default();
    info!("WebSocket connected to {}", address);
    inner.publish(
        &shared,
        TransportEvent::Connected {
            connection_id,
            address,
        },
    );
    true
}

fn finish(inner: &Weak<ChannelInner>, generation: u64, end: ConnectionEnd) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let mut shared = inner.shared.lock();
    if shared.generation != generation {
        return;
    }

    let was_connecting = shared.state == ConnectionState::Connecting;
    shared.state = ConnectionState::Disconnected;
    shared.outbound = None;
    shared.close_tx = None;
    shared.task = None;

    let address = shared.address.clone().unwrap_or_default();
    let connection_id = shared.connection_id.unwrap_or_default();

    let event = match end {
        ConnectionEnd::ClosedLocally => {
            // Reached only when the last handle was dropped mid-connection.
            TransportEvent::Closed {
                connection_id,
                address,
                initiated_locally: true,
            }
        }
        ConnectionEnd::ClosedRemotely if !was_connecting => {
            info!("WebSocket disconnected from {}", address);
            TransportEvent::Closed {
                connection_id,
                address,
                initiated_locally: false,
            }
        }
        ConnectionEnd::ClosedRemotely => {
            shared.stats.failed_connections += 1;
            warn!("Connection to {} closed during handshake", address);
            TransportEvent::Failed {
                connection_id,
                address,
                reason: "closed during handshake".to_string(),
            }
        }
        ConnectionEnd::Failed(reason) => {
            if was_connecting {
                shared.stats.failed_connections += 1;
            }
            warn!("WebSocket error on {}: {}", address, reason);
            TransportEvent::Failed {
                connection_id,
                address,
                reason,
            }
        }
    };

    inner.publish(&shared, event);
}
