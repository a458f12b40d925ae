//! Test-pattern capture backend
//!
//! Produces a moving gradient at the requested resolution. Access denial,
//! sampling failures, slow grants and device loss can be switched on to drive
//! the failure paths of the capture source.

use super::{CaptureBackend, CaptureConfig, CaptureStream, FacingMode, VideoResolution};
use crate::error::{MediaError, MediaResult};
use crate::frame::RawFrame;
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Default)]
struct SyntheticState {
    deny_access: bool,
    device_present: bool,
    frame_failures: u32,
    open_delay: Option<Duration>,
    open_attempts: u32,
    live_streams: usize,
    frames_sampled: u64,
}

/// Always-available backend that renders a test pattern
#[derive(Debug, Clone)]
pub struct SyntheticBackend {
    state: Arc<Mutex<SyntheticState>>,
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticBackend {
    /// Create a backend that grants access immediately
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SyntheticState {
                device_present: true,
                ..SyntheticState::default()
            })),
        }
    }

    /// Make subsequent opens fail with a permission error
    pub fn deny_access(&self) {
        self.state.lock().deny_access = true;
    }

    /// Let subsequent opens succeed again
    pub fn grant_access(&self) {
        self.state.lock().deny_access = false;
    }

    /// Fail the next `count` samples across all streams
    pub fn set_frame_failures(&self, count: u32) {
        self.state.lock().frame_failures = count;
    }

    /// Delay every grant by `delay`
    pub fn set_open_delay(&self, delay: Option<Duration>) {
        self.state.lock().open_delay = delay;
    }

    /// Unplug the device; open streams report it gone on their next sample
    pub fn disconnect_device(&self) {
        self.state.lock().device_present = false;
    }

    /// Plug the device back in
    pub fn reconnect_device(&self) {
        self.state.lock().device_present = true;
    }

    /// Calls to `open`, granted or not
    pub fn open_count(&self) -> u32 {
        self.state.lock().open_attempts
    }

    /// Streams that have not been released
    pub fn live_streams(&self) -> usize {
        self.state.lock().live_streams
    }

    /// Successful samples across all streams
    pub fn frames_sampled(&self) -> u64 {
        self.state.lock().frames_sampled
    }
}

#[async_trait]
impl CaptureBackend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn open(&self, config: &CaptureConfig) -> MediaResult<Box<dyn CaptureStream>> {
        let delay = {
            let mut state = self.state.lock();
            state.open_attempts += 1;
            state.open_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.deny_access {
            return Err(MediaError::PermissionDenied {
                operation: "camera access".to_string(),
            });
        }
        if !state.device_present {
            return Err(MediaError::DeviceNotFound {
                device_id: "synthetic".to_string(),
            });
        }
        state.live_streams += 1;

        let name = match config.facing {
            FacingMode::User => "Synthetic Camera (front)",
            FacingMode::Environment => "Synthetic Camera (rear)",
        };
        debug!("Opened {} at {}", name, config.resolution);

        Ok(Box::new(SyntheticStream {
            backend: self.state.clone(),
            name: name.to_string(),
            resolution: config.resolution,
            opened_at: Instant::now(),
            frame_number: 0,
            released: false,
        }))
    }
}

struct SyntheticStream {
    backend: Arc<Mutex<SyntheticState>>,
    name: String,
    resolution: VideoResolution,
    opened_at: Instant,
    frame_number: u64,
    released: bool,
}

impl SyntheticStream {
    fn render(&self) -> RgbImage {
        let VideoResolution { width, height } = self.resolution;
        let (w, h) = (u64::from(width.max(1)), u64::from(height.max(1)));
        // Scrolls four pixels per frame, wrapping at the right edge.
        let shift = self.frame_number.wrapping_mul(4) % w;
        RgbImage::from_fn(width, height, |x, y| {
            let column = (u64::from(x) + shift) % w;
            let r = (column * 255 / w) as u8;
            let g = (u64::from(y) * 255 / h) as u8;
            let b = ((column + u64::from(y)) % 256) as u8;
            Rgb([r, g, b])
        })
    }
}

impl CaptureStream for SyntheticStream {
    fn resolution(&self) -> VideoResolution {
        self.resolution
    }

    fn device_name(&self) -> &str {
        &self.name
    }

    fn current_frame(&mut self) -> MediaResult<Option<RawFrame>> {
        if self.released {
            return Err(MediaError::CaptureNotActive);
        }

        {
            let mut state = self.backend.lock();
            if !state.device_present {
                return Err(MediaError::DeviceDisconnected {
                    device_id: self.name.clone(),
                });
            }
            if state.frame_failures > 0 {
                state.frame_failures -= 1;
                return Err(MediaError::Video {
                    message: "frame not ready".to_string(),
                });
            }
            state.frames_sampled += 1;
        }

        self.frame_number += 1;
        Ok(Some(RawFrame::new(
            self.render(),
            self.opened_at.elapsed(),
            self.frame_number,
        )))
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.backend.lock().live_streams -= 1;
        debug!("Released {}", self.name);
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.release();
    }
}
