//! Connection factories used by the transport channel
//!
//! A [`Dialer`] turns an endpoint address into a [`Socket`], a sink/stream pair of
//! WebSocket messages. [`WebSocketDialer`] is the production implementation;
//! [`MemoryDialer`] keeps everything in-process and hands out [`MemoryPeer`]s so
//! tests and demos can observe what the client sent.

use crate::error::CamcastError;
use async_trait::async_trait;
use futures::{Sink, Stream, StreamExt};
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::debug;
use tungstenite::{Error as WsError, Message};

/// Outbound half of a socket
pub type SocketSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Inbound half of a socket
pub type SocketStream = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// An established, message-oriented connection
pub struct Socket {
    /// Messages written here go to the remote end
    pub sink: SocketSink,
    /// Messages and lifecycle errors from the remote end
    pub stream: SocketStream,
}

impl Socket {
    /// Wrap any sink/stream pair of WebSocket messages
    pub fn new<S, R>(sink: S, stream: R) -> Self
    where
        S: Sink<Message, Error = WsError> + Send + 'static,
        R: Stream<Item = Result<Message, WsError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket").finish_non_exhaustive()
    }
}

/// Trait for connection factories
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a connection to `address`
    async fn dial(&self, address: &str) -> Result<Socket, CamcastError>;
}

/// Dialer backed by `tokio-tungstenite`
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketDialer;

#[async_trait]
impl Dialer for WebSocketDialer {
    async fn dial(&self, address: &str) -> Result<Socket, CamcastError> {
        let (ws_stream, response) =
            connect_async(address)
                .await
                .map_err(|e| CamcastError::Connection {
                    address: address.to_string(),
                    reason: format!("WebSocket connection failed: {}", e),
                })?;

        debug!(
            "WebSocket handshake with {} completed ({})",
            address,
            response.status()
        );

        let (sink, stream) = ws_stream.split();
        Ok(Socket::new(sink, stream))
    }
}

/// Remote end of an in-memory connection
#[derive(Debug)]
pub struct MemoryPeer {
    address: String,
    from_client: Mutex<mpsc::UnboundedReceiver<Message>>,
    to_client: Mutex<Option<mpsc::UnboundedSender<Result<Message, WsError>>>>,
    stalled: Arc<AtomicBool>,
}

impl MemoryPeer {
    /// Address the client dialed
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Drain every message the client has written since the last call
    pub fn received(&self) -> Vec<Message> {
        let mut rx = self.from_client.lock();
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Send a message to the client
    pub fn push(&self, message: Message) -> bool {
        match self.to_client.lock().as_ref() {
            Some(tx) => tx.send(Ok(message)).is_ok(),
            None => false,
        }
    }

    /// Close the connection from the remote side
    pub fn close(&self) {
        if let Some(tx) = self.to_client.lock().take() {
            let _ = tx.send(Ok(Message::Close(None)));
        }
    }

    /// Drop the connection with a network error
    pub fn fail(&self, reason: &str) {
        if let Some(tx) = self.to_client.lock().take() {
            let error = std::io::Error::new(std::io::ErrorKind::ConnectionReset, reason.to_string());
            let _ = tx.send(Err(WsError::Io(error)));
        }
    }

    /// While stalled, writes from the client never complete
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct MemoryDialerInner {
    refuse: Mutex<Option<String>>,
    dial_delay: Mutex<Option<Duration>>,
    stall_new_peers: AtomicBool,
    dial_count: AtomicU32,
    peers: Mutex<Vec<Arc<MemoryPeer>>>,
}

/// In-process dialer for tests and demos
#[derive(Debug, Clone, Default)]
pub struct MemoryDialer {
    inner: Arc<MemoryDialerInner>,
}

impl MemoryDialer {
    /// Create a dialer that accepts every connection
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse subsequent dials with `reason`
    pub fn refuse_connections(&self, reason: &str) {
        *self.inner.refuse.lock() = Some(reason.to_string());
    }

    /// Accept subsequent dials again
    pub fn accept_connections(&self) {
        *self.inner.refuse.lock() = None;
    }

    /// Delay every dial, keeping the channel in `Connecting`
    pub fn set_dial_delay(&self, delay: Option<Duration>) {
        *self.inner.dial_delay.lock() = delay;
    }

    /// Peers created from now on start stalled
    pub fn stall_new_peers(&self, stalled: bool) {
        self.inner.stall_new_peers.store(stalled, Ordering::SeqCst);
    }

    /// Number of dial attempts so far
    pub fn dial_count(&self) -> u32 {
        self.inner.dial_count.load(Ordering::SeqCst)
    }

    /// All peers created so far, oldest first
    pub fn peers(&self) -> Vec<Arc<MemoryPeer>> {
        self.inner.peers.lock().clone()
    }

    /// Most recently created peer
    pub fn last_peer(&self) -> Option<Arc<MemoryPeer>> {
        self.inner.peers.lock().last().cloned()
    }
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn dial(&self, address: &str) -> Result<Socket, CamcastError> {
        self.inner.dial_count.fetch_add(1, Ordering::SeqCst);

        let delay = *self.inner.dial_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(reason) = self.inner.refuse.lock().clone() {
            return Err(CamcastError::Connection {
                address: address.to_string(),
                reason,
            });
        }

        let (client_tx, peer_rx) = mpsc::unbounded_channel::<Message>();
        let (peer_tx, client_rx) = mpsc::unbounded_channel::<Result<Message, WsError>>();
        let stalled = Arc::new(AtomicBool::new(
            self.inner.stall_new_peers.load(Ordering::SeqCst),
        ));

        let peer = Arc::new(MemoryPeer {
            address: address.to_string(),
            from_client: Mutex::new(peer_rx),
            to_client: Mutex::new(Some(peer_tx)),
            stalled: stalled.clone(),
        });
        self.inner.peers.lock().push(peer);

        let sink = futures::sink::unfold(client_tx, move |tx, message: Message| {
            let stalled = stalled.clone();
            async move {
                if stalled.load(Ordering::SeqCst) {
                    futures::future::pending::<()>().await;
                }
                tx.send(message).map_err(|_| WsError::ConnectionClosed)?;
                Ok::<_, WsError>(tx)
            }
        });

        let stream = futures::stream::unfold(client_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        Ok(Socket::new(sink, stream))
    }
}
