//! # camcast media
//!
//! Camera access and frame encoding for camcast. A capture backend opens the
//! device, [`CaptureSource`] manages its lifecycle, and frames are sampled on
//! demand and compressed to JPEG.

#![warn(clippy::all)]

pub mod capture;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod video_capture;

// Re-export main types
pub use capture::{
    platform_backend, CaptureBackend, CaptureConfig, CaptureStream, FacingMode, SyntheticBackend,
    VideoResolution,
};
#[cfg(feature = "webcam")]
pub use capture::WebcamBackend;
pub use encoder::{encoder_quality, JpegEncoder, DEFAULT_QUALITY};
pub use error::{ErrorCategory, MediaError, MediaResult};
pub use frame::{EncodedFrame, RawFrame, JPEG_MIME};
pub use video_capture::{
    CaptureEvent, CaptureSession, CaptureSource, CaptureStats, CAPTURE_ERROR_MESSAGE,
};
