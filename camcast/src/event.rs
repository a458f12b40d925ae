//! Event system for connection, camera and streaming notifications

use crate::{StreamSettings, VideoResolution};
use serde::Serialize;
use tokio::sync::mpsc;

/// Why streaming ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// `toggle_streaming` while streaming
    UserRequested,
    /// The camera was stopped or lost
    CameraStopped,
    /// The connection closed or failed
    ConnectionLost,
    /// Too many sends in a row failed
    RepeatedSendFailures {
        /// Failed sends counted
        failures: u32,
    },
    /// The streamer shut down
    Shutdown,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::UserRequested => f.write_str("stopped by user"),
            StopReason::CameraStopped => f.write_str("camera stopped"),
            StopReason::ConnectionLost => f.write_str("connection lost"),
            StopReason::RepeatedSendFailures { failures } => {
                write!(f, "{} sends failed in a row", failures)
            }
            StopReason::Shutdown => f.write_str("shutting down"),
        }
    }
}

/// Why a request to start streaming was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    /// The transport is not connected
    NotConnected,
    /// The camera is not active
    CameraInactive,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::NotConnected => f.write_str("Not connected to WebSocket server"),
            RejectReason::CameraInactive => f.write_str("Camera is not active"),
        }
    }
}

/// How a front end should present an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    /// Something the user asked for happened
    Success,
    /// Neutral state change
    Info,
    /// Something went wrong
    Error,
}

/// Streamer events that can occur during a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Event {
    /// The WebSocket handshake completed
    Connected {
        /// Endpoint address
        address: String,
    },
    /// The connection closed
    Disconnected {
        /// Endpoint address
        address: String,
        /// True when closed through `disconnect`
        initiated_locally: bool,
    },
    /// A connection could not be established or broke
    ConnectionFailed {
        /// Endpoint address
        address: String,
        /// Failure description
        reason: String,
    },
    /// The camera was opened
    CameraStarted {
        /// Device name
        device: String,
        /// Granted resolution
        resolution: VideoResolution,
    },
    /// The camera was released
    CameraStopped,
    /// The camera could not be opened or was lost
    CameraError {
        /// User-facing message
        message: String,
    },
    /// Frames are being sent
    StreamingStarted {
        /// Settings in effect
        settings: StreamSettings,
    },
    /// Frames are no longer sent
    StreamingStopped {
        /// Why streaming ended
        reason: StopReason,
    },
    /// A request to start streaming was refused
    StreamRejected {
        /// First unmet precondition
        reason: RejectReason,
    },
    /// Frame rate or quality changed
    SettingsChanged {
        /// New settings
        settings: StreamSettings,
    },
}

impl Event {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::Connected { .. } => "connected",
            Event::Disconnected { .. } => "disconnected",
            Event::ConnectionFailed { .. } => "connection_failed",
            Event::CameraStarted { .. } => "camera_started",
            Event::CameraStopped => "camera_stopped",
            Event::CameraError { .. } => "camera_error",
            Event::StreamingStarted { .. } => "streaming_started",
            Event::StreamingStopped { .. } => "streaming_stopped",
            Event::StreamRejected { .. } => "stream_rejected",
            Event::SettingsChanged { .. } => "settings_changed",
        }
    }

    /// Presentation severity
    pub fn severity(&self) -> Severity {
        match self {
            Event::Connected { .. } | Event::StreamingStarted { .. } => Severity::Success,
            Event::ConnectionFailed { .. }
            | Event::CameraError { .. }
            | Event::StreamRejected { .. } => Severity::Error,
            Event::StreamingStopped {
                reason: StopReason::RepeatedSendFailures { .. },
            } => Severity::Error,
            _ => Severity::Info,
        }
    }

    /// One-line human-readable description
    pub fn message(&self) -> String {
        match self {
            Event::Connected { .. } => "WebSocket connected".to_string(),
            Event::Disconnected { .. } => "WebSocket disconnected".to_string(),
            Event::ConnectionFailed { reason, .. } => {
                format!("Failed to connect to WebSocket: {}", reason)
            }
            Event::CameraStarted { device, resolution } => {
                format!("Camera started: {} ({})", device, resolution)
            }
            Event::CameraStopped => "Camera stopped".to_string(),
            Event::CameraError { message } => message.clone(),
            Event::StreamingStarted { .. } => "Streaming started".to_string(),
            Event::StreamingStopped {
                reason: StopReason::UserRequested,
            } => "Streaming stopped".to_string(),
            Event::StreamingStopped { reason } => format!("Streaming stopped: {}", reason),
            Event::StreamRejected { reason } => reason.to_string(),
            Event::SettingsChanged { settings } => format!(
                "{} fps, quality {:.2}",
                settings.frame_rate(),
                settings.quality()
            ),
        }
    }

    /// Check if this is a connection-related event
    pub fn is_connection_event(&self) -> bool {
        matches!(
            self,
            Event::Connected { .. } | Event::Disconnected { .. } | Event::ConnectionFailed { .. }
        )
    }

    /// Check if this is a camera-related event
    pub fn is_camera_event(&self) -> bool {
        matches!(
            self,
            Event::CameraStarted { .. } | Event::CameraStopped | Event::CameraError { .. }
        )
    }

    /// Check if this is a streaming-related event
    pub fn is_streaming_event(&self) -> bool {
        matches!(
            self,
            Event::StreamingStarted { .. }
                | Event::StreamingStopped { .. }
                | Event::StreamRejected { .. }
                | Event::SettingsChanged { .. }
        )
    }

    /// Check if this is an error event
    pub fn is_error_event(&self) -> bool {
        self.severity() == Severity::Error
    }
}

/// Stream of streamer events for async iteration
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<Event>,
    filter: EventFilter,
}

impl EventStream {
    /// Create a new event stream with a receiver
    pub fn new(receiver: mpsc::UnboundedReceiver<Event>) -> Self {
        Self::filtered(receiver, EventFilter::all())
    }

    /// Create an event stream that only yields events matching `filter`
    pub fn filtered(receiver: mpsc::UnboundedReceiver<Event>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Get the next event from the stream
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.should_include(&event) {
                return Some(event);
            }
        }
    }

    /// Try to get the next event without blocking
    pub fn try_next(&mut self) -> Result<Option<Event>, mpsc::error::TryRecvError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.filter.should_include(&event) => return Ok(Some(event)),
                Ok(_) => {}
                Err(mpsc::error::TryRecvError::Empty) => return Ok(None),
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    return Err(mpsc::error::TryRecvError::Disconnected)
                }
            }
        }
    }

    /// Update the filter
    pub fn set_filter(&mut self, filter: EventFilter) {
        self.filter = filter;
    }

    /// Close the event stream
    pub fn close(&mut self) {
        self.receiver.close();
    }

    /// Check if the event stream is closed
    pub fn is_closed(&self) -> bool {
        self.receiver.is_closed()
    }
}

/// Event filter for selective event processing
#[derive(Debug, Clone)]
pub struct EventFilter {
    /// Whether to include connection events
    pub include_connection_events: bool,
    /// Whether to include camera events
    pub include_camera_events: bool,
    /// Whether to include streaming events
    pub include_streaming_events: bool,
    /// Specific event types to include (if specified, overrides other filters)
    pub specific_event_types: Option<Vec<String>>,
}

impl EventFilter {
    /// Create a filter that includes all events
    pub fn all() -> Self {
        Self {
            include_connection_events: true,
            include_camera_events: true,
            include_streaming_events: true,
            specific_event_types: None,
        }
    }

    /// Create a filter that includes only connection events
    pub fn connection_only() -> Self {
        Self {
            include_connection_events: true,
            include_camera_events: false,
            include_streaming_events: false,
            specific_event_types: None,
        }
    }

    /// Create a filter that includes only camera events
    pub fn camera_only() -> Self {
        Self {
            include_connection_events: false,
            include_camera_events: true,
            include_streaming_events: false,
            specific_event_types: None,
        }
    }

    /// Create a filter that includes only streaming events
    pub fn streaming_only() -> Self {
        Self {
            include_connection_events: false,
            include_camera_events: false,
            include_streaming_events: true,
            specific_event_types: None,
        }
    }

    /// Create a filter for specific event types
    pub fn specific(event_types: Vec<String>) -> Self {
        Self {
            include_connection_events: false,
            include_camera_events: false,
            include_streaming_events: false,
            specific_event_types: Some(event_types),
        }
    }

    /// Check if an event should be included based on this filter
    pub fn should_include(&self, event: &Event) -> bool {
        if let Some(ref specific_types) = self.specific_event_types {
            return specific_types.iter().any(|t| t == event.event_type());
        }

        (self.include_connection_events && event.is_connection_event())
            || (self.include_camera_events && event.is_camera_event())
            || (self.include_streaming_events && event.is_streaming_event())
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::all()
    }
}
