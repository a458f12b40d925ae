//! Error types for camcast

use std::time::Duration;
use thiserror::Error;

/// Main error type for camcast operations
#[derive(Error, Debug)]
pub enum CamcastError {
    /// Endpoint address could not be used to open a connection
    #[error("Invalid WebSocket URL {address}: {reason}")]
    InvalidAddress {
        /// Address as supplied by the user
        address: String,
        /// Why the address was rejected
        reason: String,
    },

    /// Connection error
    #[error("Connection to {address} failed: {reason}")]
    Connection {
        /// Endpoint the connection was made to
        address: String,
        /// Reason for connection failure
        reason: String,
    },

    /// Transport error
    #[error("Transport error: {reason}")]
    Transport {
        /// Reason for transport error
        reason: String,
    },

    /// Operation requires an open connection
    #[error("Not connected to WebSocket server")]
    NotConnected,

    /// Operation timed out error
    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Duration after which timeout occurred
        duration: Duration,
    },

    /// Invalid configuration value
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration {
        /// Offending field
        field: String,
        /// Reason the value was rejected
        reason: String,
    },

    /// Camera could not be opened
    #[error("Capture unavailable: {reason}")]
    CaptureUnavailable {
        /// Reason reported by the capture backend
        reason: String,
    },

    /// Streaming toggle was rejected because a precondition does not hold
    #[error("Streaming rejected: {reason}")]
    StreamRejected {
        /// Human readable rejection reason
        reason: String,
    },
}

/// Result alias used across camcast crates
pub type CamcastResult<T> = Result<T, CamcastError>;

impl CamcastError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> String {
        match self {
            CamcastError::InvalidAddress { .. } => "INVALID_ADDRESS".to_string(),
            CamcastError::Connection { .. } => "CONNECTION_FAILED".to_string(),
            CamcastError::Transport { .. } => "TRANSPORT_ERROR".to_string(),
            CamcastError::NotConnected => "NOT_CONNECTED".to_string(),
            CamcastError::Timeout { .. } => "TIMEOUT".to_string(),
            CamcastError::InvalidConfiguration { .. } => "INVALID_CONFIGURATION".to_string(),
            CamcastError::CaptureUnavailable { .. } => "CAPTURE_UNAVAILABLE".to_string(),
            CamcastError::StreamRejected { .. } => "STREAM_REJECTED".to_string(),
        }
    }

    /// Whether retrying the same operation later can succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CamcastError::Connection { .. }
                | CamcastError::Transport { .. }
                | CamcastError::Timeout { .. }
                | CamcastError::CaptureUnavailable { .. }
                | CamcastError::NotConnected
        )
    }
}
