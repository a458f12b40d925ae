//! # camcast core
//!
//! Transport layer for camcast: a single outbound WebSocket connection with an
//! explicit `Disconnected -> Connecting -> Connected` state machine, a
//! fire-and-forget `send`, and observable lifecycle events.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod dialer;
pub mod error;
pub mod transport;

// Re-export main types
pub use dialer::{Dialer, MemoryDialer, MemoryPeer, Socket, WebSocketDialer};
pub use error::{CamcastError, CamcastResult};
pub use transport::{
    validate_address, ChannelStats, ConnectionConfig, ConnectionState, Payload, TransportChannel,
    TransportEvent,
};
