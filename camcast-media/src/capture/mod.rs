//! Camera capture backends
//!
//! A [`CaptureBackend`] opens the device and hands back a [`CaptureStream`], the
//! scoped device handle. Dropping a stream releases the device.

pub mod synthetic;
#[cfg(feature = "webcam")]
pub mod webcam;

use crate::error::{MediaError, MediaResult};
use crate::frame::RawFrame;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

pub use synthetic::SyntheticBackend;
#[cfg(feature = "webcam")]
pub use webcam::WebcamBackend;

/// Video resolution information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct VideoResolution {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl VideoResolution {
    /// Create a resolution
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// 1280x720
    pub const HD: Self = Self::new(1280, 720);
    /// 1920x1080
    pub const FULL_HD: Self = Self::new(1920, 1080);
    /// 640x480
    pub const VGA: Self = Self::new(640, 480);

    /// Number of pixels
    pub fn pixel_count(&self) -> u32 {
        self.width * self.height
    }

    /// Width divided by height
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

impl Default for VideoResolution {
    fn default() -> Self {
        Self::HD
    }
}

impl std::fmt::Display for VideoResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Which camera to prefer when several are present
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum FacingMode {
    /// Front-facing camera
    #[default]
    User,
    /// Rear-facing camera
    Environment,
}

/// Device request parameters
#[derive(Debug, Clone, Serialize)]
pub struct CaptureConfig {
    /// Ideal resolution; the backend may grant another
    pub resolution: VideoResolution,
    /// Facing preference
    pub facing: FacingMode,
    /// Explicit device, overrides `facing`
    pub device_index: Option<u32>,
    /// Frame rate requested from the device
    pub framerate: u32,
    /// Bound on waiting for the backend to grant access
    pub open_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            resolution: VideoResolution::HD,
            facing: FacingMode::User,
            device_index: None,
            framerate: 30,
            open_timeout: Duration::from_secs(10),
        }
    }
}

impl CaptureConfig {
    /// Validate configuration
    pub fn validate(&self) -> MediaResult<()> {
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(MediaError::InvalidConfiguration {
                message: "Invalid resolution".to_string(),
            });
        }

        if self.framerate == 0 || self.framerate > 120 {
            return Err(MediaError::InvalidConfiguration {
                message: "Invalid framerate".to_string(),
            });
        }

        if self.open_timeout.is_zero() {
            return Err(MediaError::InvalidConfiguration {
                message: "Open timeout must be > 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Opens capture devices
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Request access to a device, suspending until it is granted or denied
    async fn open(&self, config: &CaptureConfig) -> MediaResult<Box<dyn CaptureStream>>;
}

/// An opened device
///
/// Implementations release the device in `Drop` as well as in [`release`].
///
/// [`release`]: CaptureStream::release
pub trait CaptureStream: Send {
    /// Resolution the device actually delivers
    fn resolution(&self) -> VideoResolution;

    /// Human-readable device name
    fn device_name(&self) -> &str;

    /// Sample the picture currently shown by the device
    ///
    /// `Ok(None)` means no picture is available yet.
    fn current_frame(&mut self) -> MediaResult<Option<RawFrame>>;

    /// Stop the device. Idempotent.
    fn release(&mut self);
}

/// Get the backend for this build
pub fn platform_backend() -> Arc<dyn CaptureBackend> {
    #[cfg(feature = "webcam")]
    {
        Arc::new(WebcamBackend::new())
    }
    #[cfg(not(feature = "webcam"))]
    {
        Arc::new(SyntheticBackend::new())
    }
}
