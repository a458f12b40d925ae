//! Media error types and handling
//!
//! Errors raised while opening camera devices, sampling frames and encoding them.
//! The capture source collapses every device-access failure into one generic
//! user-facing message; the typed variants here remain available for logging and
//! programmatic callers.

use thiserror::Error;

/// Main error type for capture and encoding operations
#[derive(Error, Debug)]
pub enum MediaError {
    /// I/O operation failed
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Invalid configuration provided
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// Encoding operation failed
    #[error("Encoding failed: {codec} - {reason}")]
    EncodingFailed {
        /// Codec name
        codec: String,
        /// Failure reason
        reason: String,
    },

    /// Device enumeration failed
    #[error("Device enumeration failed: {reason}")]
    DeviceEnumerationFailed {
        /// Failure reason
        reason: String,
    },

    /// Device not found error
    #[error("Device not found: {device_id}")]
    DeviceNotFound {
        /// Device identifier
        device_id: String,
    },

    /// Device is held by another process
    #[error("Device busy: {device_id}")]
    DeviceBusy {
        /// Device identifier
        device_id: String,
    },

    /// Device went away while capturing
    #[error("Device disconnected: {device_id}")]
    DeviceDisconnected {
        /// Device identifier
        device_id: String,
    },

    /// Permission denied error
    #[error("Permission denied: {operation}")]
    PermissionDenied {
        /// Operation that was denied
        operation: String,
    },

    /// Capture not active error
    #[error("Capture not active")]
    CaptureNotActive,

    /// Camera start was superseded by a stop
    #[error("Capture start cancelled")]
    StartCancelled,

    /// Backend compiled out of this build
    #[error("Capture backend unavailable: {backend}")]
    BackendUnavailable {
        /// Backend name
        backend: String,
    },

    /// Timeout error
    #[error("Operation timed out after {duration:?}")]
    Timeout {
        /// Duration after which timeout occurred
        duration: std::time::Duration,
    },

    /// Video specific errors
    #[error("Video error: {message}")]
    Video {
        /// Error message
        message: String,
    },
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;

impl MediaError {
    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            MediaError::Io { .. } => true,
            MediaError::Timeout { .. } => true,
            MediaError::DeviceBusy { .. } => true,
            MediaError::DeviceDisconnected { .. } => true,
            MediaError::PermissionDenied { .. } => true,
            MediaError::Video { .. } => true,
            MediaError::StartCancelled => true,
            MediaError::EncodingFailed { .. } => false,
            MediaError::BackendUnavailable { .. } => false,
            MediaError::InvalidConfiguration { .. } => false,
            _ => false,
        }
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            MediaError::Io { .. } => ErrorCategory::System,
            MediaError::InvalidConfiguration { .. } => ErrorCategory::Configuration,
            MediaError::EncodingFailed { .. } => ErrorCategory::Codec,
            MediaError::DeviceEnumerationFailed { .. } => ErrorCategory::Device,
            MediaError::DeviceNotFound { .. } => ErrorCategory::Device,
            MediaError::DeviceBusy { .. } => ErrorCategory::Device,
            MediaError::DeviceDisconnected { .. } => ErrorCategory::Device,
            MediaError::PermissionDenied { .. } => ErrorCategory::System,
            MediaError::CaptureNotActive => ErrorCategory::State,
            MediaError::StartCancelled => ErrorCategory::State,
            MediaError::BackendUnavailable { .. } => ErrorCategory::Platform,
            MediaError::Timeout { .. } => ErrorCategory::System,
            MediaError::Video { .. } => ErrorCategory::Video,
        }
    }

    /// Whether this error means the camera could not be accessed at all
    pub fn is_access_failure(&self) -> bool {
        matches!(
            self,
            MediaError::PermissionDenied { .. }
                | MediaError::DeviceNotFound { .. }
                | MediaError::DeviceBusy { .. }
                | MediaError::DeviceEnumerationFailed { .. }
                | MediaError::BackendUnavailable { .. }
                | MediaError::Timeout { .. }
        )
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// System-level errors (I/O, permissions, etc.)
    System,
    /// Configuration and parameter errors
    Configuration,
    /// Codec-related errors
    Codec,
    /// Platform compatibility errors
    Platform,
    /// Device and hardware errors
    Device,
    /// State management errors
    State,
    /// Video-specific errors
    Video,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let denied = MediaError::PermissionDenied {
            operation: "camera access".to_string(),
        };
        assert_eq!(denied.category(), ErrorCategory::System);
        assert!(denied.is_recoverable());
        assert!(denied.is_access_failure());

        let codec_error = MediaError::EncodingFailed {
            codec: "JPEG".to_string(),
            reason: "zero sized image".to_string(),
        };
        assert_eq!(codec_error.category(), ErrorCategory::Codec);
        assert!(!codec_error.is_recoverable());
        assert!(!codec_error.is_access_failure());
    }

    #[test]
    fn test_error_display() {
        let error = MediaError::DeviceBusy {
            device_id: "0".to_string(),
        };
        assert_eq!(error.to_string(), "Device busy: 0");
    }

    #[test]
    fn test_error_from_io() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let media_error = MediaError::from(io_error);

        match media_error {
            MediaError::Io { .. } => (),
            _ => panic!("Expected Io error variant"),
        }
    }
}
