//! # camcast - webcam frames over WebSocket
//!
//! camcast captures frames from a camera, compresses them to JPEG and pushes
//! them to a remote endpoint over a single WebSocket connection at a
//! configurable rate and quality.
//!
//! ## Key Features
//!
//! - **Explicit session state**: streaming only runs while the camera is active
//!   and the connection is open, and stops the moment either goes away
//! - **One emitter at a time**: rate and quality changes swap the periodic task
//!   atomically
//! - **Typed notifications**: connection, camera and streaming events for any
//!   front end to render
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use camcast::{Streamer, StreamerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let streamer = Streamer::new(StreamerConfig::default())?;
//!     // Subscribe first: `Connected` may arrive while the camera starts.
//!     let mut events = streamer.events();
//!
//!     streamer.connect("ws://localhost:9000")?;
//!     streamer.start_camera().await?;
//!     streamer.set_frame_rate(10)?;
//!
//!     while let Some(event) = events.next().await {
//!         println!("{}", event.message());
//!         if matches!(event, camcast::Event::Connected { .. }) {
//!             streamer.toggle_streaming()?;
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use camcast_core::{
    validate_address, CamcastError, CamcastResult, ChannelStats, ConnectionConfig,
    ConnectionState, Dialer, MemoryDialer, MemoryPeer, Payload, TransportChannel, TransportEvent,
    WebSocketDialer,
};

pub use camcast_media::{
    platform_backend, CaptureBackend, CaptureConfig, CaptureEvent, CaptureSession, CaptureSource,
    CaptureStats, EncodedFrame, FacingMode, MediaError, SyntheticBackend, VideoResolution,
    CAPTURE_ERROR_MESSAGE,
};
#[cfg(feature = "webcam")]
pub use camcast_media::WebcamBackend;

// Public API modules
pub mod config;
pub mod event;
pub mod logging;
pub mod session;
pub mod streamer;
pub mod streaming;

// Re-export main API types
pub use config::{FailurePolicy, PayloadFormat, StreamSettings, StreamerConfig};
pub use event::{Event, EventFilter, EventStream, RejectReason, Severity, StopReason};
pub use session::{SessionInput, SessionMachine, SessionState, Transition};
pub use streamer::{Streamer, StreamerStatus};
pub use streaming::{EmitterHandle, LoopSignal, LoopStats, StreamingLoop};
