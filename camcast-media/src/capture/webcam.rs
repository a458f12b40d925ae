//! Webcam capture using nokhwa.
//!
//! A dedicated thread owns the camera and keeps the most recent decoded frame
//! in a shared slot; [`CaptureStream::current_frame`] samples that slot.

use super::{CaptureBackend, CaptureConfig, CaptureStream, FacingMode, VideoResolution};
use crate::error::{MediaError, MediaResult};
use crate::frame::RawFrame;
use async_trait::async_trait;
use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::Camera;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

const FRONT_HINTS: &[&str] = &["front", "facetime", "user", "integrated"];
const REAR_HINTS: &[&str] = &["back", "rear", "environment"];

/// Read errors in a row after which the device is considered gone
const MAX_READ_ERRORS: u32 = 30;

/// Camera backend for physical devices
#[derive(Debug, Clone, Copy, Default)]
pub struct WebcamBackend;

impl WebcamBackend {
    /// Create the backend
    pub fn new() -> Self {
        Self
    }

    /// List available webcam devices.
    pub fn list_devices() -> MediaResult<Vec<String>> {
        let devices = nokhwa::query(ApiBackend::Auto).map_err(|e| {
            MediaError::DeviceEnumerationFailed {
                reason: e.to_string(),
            }
        })?;

        Ok(devices
            .into_iter()
            .map(|info| format!("{}: {}", info.index(), info.human_name()))
            .collect())
    }
}

#[async_trait]
impl CaptureBackend for WebcamBackend {
    fn name(&self) -> &str {
        "webcam"
    }

    async fn open(&self, config: &CaptureConfig) -> MediaResult<Box<dyn CaptureStream>> {
        let latest = Arc::new(Mutex::new(None));
        let running = Arc::new(AtomicBool::new(true));
        let failed = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread = std::thread::Builder::new()
            .name("camcast-webcam".to_string())
            .spawn({
                let config = config.clone();
                let latest = latest.clone();
                let running = running.clone();
                let failed = failed.clone();
                move || capture_thread(config, latest, running, failed, ready_tx)
            })?;

        let (name, resolution) = ready_rx.await.map_err(|_| MediaError::Video {
            message: "capture thread exited before the device opened".to_string(),
        })??;

        info!("Webcam opened: {} at {}", name, resolution);

        Ok(Box::new(WebcamStream {
            name,
            resolution,
            latest,
            running,
            failed,
            thread: Some(thread),
        }))
    }
}

struct WebcamStream {
    name: String,
    resolution: VideoResolution,
    latest: Arc<Mutex<Option<RawFrame>>>,
    running: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureStream for WebcamStream {
    fn resolution(&self) -> VideoResolution {
        self.resolution
    }

    fn device_name(&self) -> &str {
        &self.name
    }

    fn current_frame(&mut self) -> MediaResult<Option<RawFrame>> {
        if self.thread.is_none() {
            return Err(MediaError::CaptureNotActive);
        }
        if self.failed.load(Ordering::Acquire) {
            return Err(MediaError::DeviceDisconnected {
                device_id: self.name.clone(),
            });
        }
        Ok(self.latest.lock().clone())
    }

    fn release(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Webcam capture thread panicked");
            }
            info!("Webcam capture stopped: {}", self.name);
        }
    }
}

impl Drop for WebcamStream {
    fn drop(&mut self) {
        self.release();
    }
}

fn capture_thread(
    config: CaptureConfig,
    latest: Arc<Mutex<Option<RawFrame>>>,
    running: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    ready_tx: oneshot::Sender<MediaResult<(String, VideoResolution)>>,
) {
    let mut camera = match open_camera(&config) {
        Ok(camera) => camera,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let granted = camera.resolution();
    let resolution = VideoResolution::new(granted.width(), granted.height());
    let name = camera.info().human_name();

    // The requester gave up (timeout or cancelled start).
    if ready_tx.send(Ok((name, resolution))).is_err() {
        let _ = camera.stop_stream();
        return;
    }

    let started = Instant::now();
    let mut frame_number = 0u64;
    let mut read_errors = 0u32;

    while running.load(Ordering::Acquire) {
        let decoded = match camera
            .frame()
            .and_then(|buffer| buffer.decode_image::<RgbFormat>())
        {
            Ok(decoded) => decoded,
            Err(e) => {
                read_errors += 1;
                debug!("Webcam read failed ({}): {}", read_errors, e);
                if read_errors >= MAX_READ_ERRORS {
                    warn!("Webcam stopped delivering frames: {}", e);
                    failed.store(true, Ordering::Release);
                    break;
                }
                continue;
            }
        };
        read_errors = 0;

        let (width, height) = (decoded.width(), decoded.height());
        if let Some(image) = RgbImage::from_raw(width, height, decoded.into_raw()) {
            frame_number += 1;
            *latest.lock() = Some(RawFrame::new(image, started.elapsed(), frame_number));
        }
    }

    if let Err(e) = camera.stop_stream() {
        debug!("Webcam stop_stream failed: {}", e);
    }
}

fn open_camera(config: &CaptureConfig) -> MediaResult<Camera> {
    let index = select_device(config)?;
    let format = CameraFormat::new(
        Resolution::new(config.resolution.width, config.resolution.height),
        FrameFormat::MJPEG,
        config.framerate,
    );
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));

    let mut camera = Camera::new(index, requested).map_err(|e| open_error(e.to_string()))?;
    camera
        .open_stream()
        .map_err(|e| open_error(e.to_string()))?;
    Ok(camera)
}

fn select_device(config: &CaptureConfig) -> MediaResult<CameraIndex> {
    if let Some(index) = config.device_index {
        return Ok(CameraIndex::Index(index));
    }

    let devices =
        nokhwa::query(ApiBackend::Auto).map_err(|e| MediaError::DeviceEnumerationFailed {
            reason: e.to_string(),
        })?;

    let hints = match config.facing {
        FacingMode::User => FRONT_HINTS,
        FacingMode::Environment => REAR_HINTS,
    };
    let preferred = devices.iter().find(|device| {
        let name = device.human_name().to_lowercase();
        hints.iter().any(|hint| name.contains(hint))
    });
    let chosen = preferred.or_else(|| match config.facing {
        FacingMode::User => devices.first(),
        FacingMode::Environment => devices.last(),
    });

    chosen
        .map(|device| device.index().clone())
        .ok_or_else(|| MediaError::DeviceNotFound {
            device_id: "default".to_string(),
        })
}

fn open_error(reason: String) -> MediaError {
    let lowered = reason.to_lowercase();
    if lowered.contains("permission") || lowered.contains("denied") {
        MediaError::PermissionDenied { operation: reason }
    } else if lowered.contains("busy") {
        MediaError::DeviceBusy { device_id: reason }
    } else {
        MediaError::Video { message: reason }
    }
}
