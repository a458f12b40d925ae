//! Capture source: camera lifecycle and on-demand frame encoding
//!
//! [`CaptureSource`] owns the opened device and the encoder. Frames are pulled,
//! never pushed: [`CaptureSource::capture_frame`] samples whatever the device is
//! currently showing and encodes it as JPEG.

use crate::capture::{CaptureBackend, CaptureConfig, CaptureStream, VideoResolution};
use crate::encoder::JpegEncoder;
use crate::error::{MediaError, MediaResult};
use crate::frame::EncodedFrame;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

/// Error shown to the user for any failure to open the camera
pub const CAPTURE_ERROR_MESSAGE: &str =
    "Could not access webcam. Please ensure you have granted camera permission.";

/// Snapshot of the camera session
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CaptureSession {
    /// Device open and sampling
    pub active: bool,
    /// Waiting for the backend to grant access
    pub loading: bool,
    /// User-facing error from the last failed start
    pub error: Option<String>,
    /// Resolution asked for
    pub target_resolution: VideoResolution,
    /// Resolution granted, while active
    pub resolution: Option<VideoResolution>,
    /// Device name, while active
    pub device: Option<String>,
}

/// Capture statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CaptureStats {
    /// Frames sampled and encoded
    pub frames_captured: u64,
    /// Total encoded bytes
    pub bytes_encoded: u64,
    /// Quality of the last encoded frame
    pub last_quality: Option<f32>,
}

/// Capture lifecycle events
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// Access requested
    Starting,
    /// Access granted
    Started {
        /// Device name
        device: String,
        /// Granted resolution
        resolution: VideoResolution,
    },
    /// Device released
    Stopped,
    /// Access denied or device lost
    Failed {
        /// User-facing message
        message: String,
    },
}

struct CaptureState {
    session: CaptureSession,
    stream: Option<Box<dyn CaptureStream>>,
    encoder: JpegEncoder,
    sequence: u64,
    generation: u64,
    stats: CaptureStats,
}

struct CaptureShared {
    backend: Arc<dyn CaptureBackend>,
    config: CaptureConfig,
    state: Mutex<CaptureState>,
    active_tx: watch::Sender<bool>,
    event_tx: broadcast::Sender<CaptureEvent>,
}

impl Drop for CaptureShared {
    fn drop(&mut self) {
        if let Some(mut stream) = self.state.get_mut().stream.take() {
            stream.release();
        }
    }
}

/// Clears `loading` when a start is dropped before the backend answers
struct PendingStart<'a> {
    shared: &'a CaptureShared,
    generation: u64,
    armed: bool,
}

impl PendingStart<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingStart<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.shared.state.lock();
        if state.generation == self.generation && state.session.loading {
            state.session.loading = false;
            debug!("Camera start abandoned before the backend answered");
        }
    }
}

/// Camera access with start/stop lifecycle
///
/// Cloning yields another handle to the same source. The device is released
/// when the last handle is dropped.
#[derive(Clone)]
pub struct CaptureSource {
    shared: Arc<CaptureShared>,
}

impl std::fmt::Debug for CaptureSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSource")
            .field("backend", &self.shared.backend.name())
            .field("session", &self.shared.state.lock().session)
            .finish()
    }
}

impl CaptureSource {
    /// Create a source that opens devices through `backend`
    pub fn new(backend: Arc<dyn CaptureBackend>, config: CaptureConfig) -> Self {
        let (active_tx, _) = watch::channel(false);
        let (event_tx, _) = broadcast::channel(32);

        Self {
            shared: Arc::new(CaptureShared {
                backend,
                state: Mutex::new(CaptureState {
                    session: CaptureSession {
                        target_resolution: config.resolution,
                        ..CaptureSession::default()
                    },
                    stream: None,
                    encoder: JpegEncoder::new(),
                    sequence: 0,
                    generation: 0,
                    stats: CaptureStats::default(),
                }),
                config,
                active_tx,
                event_tx,
            }),
        }
    }

    /// Request camera access
    ///
    /// No-op while active or while another start is in flight. On failure the
    /// session carries [`CAPTURE_ERROR_MESSAGE`] and the typed error is returned.
    pub async fn start(&self) -> MediaResult<()> {
        let generation = {
            let mut state = self.shared.state.lock();
            if state.session.active || state.session.loading {
                debug!("Camera start ignored: already active or starting");
                return Ok(());
            }
            state.session.loading = true;
            state.session.error = None;
            state.generation += 1;
            state.generation
        };
        let mut pending = PendingStart {
            shared: &self.shared,
            generation,
            armed: true,
        };

        let config = &self.shared.config;
        info!(
            "Requesting camera via {} at {}",
            self.shared.backend.name(),
            config.resolution
        );
        let _ = self.shared.event_tx.send(CaptureEvent::Starting);

        let opened = match tokio::time::timeout(config.open_timeout, self.shared.backend.open(config))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(MediaError::Timeout {
                duration: config.open_timeout,
            }),
        };
        pending.disarm();

        let mut state = self.shared.state.lock();
        if state.generation != generation {
            drop(state);
            if let Ok(mut stream) = opened {
                debug!("Camera granted after stop; releasing");
                stream.release();
            }
            return Err(MediaError::StartCancelled);
        }
        state.session.loading = false;

        match opened {
            Ok(stream) => {
                let resolution = stream.resolution();
                let device = stream.device_name().to_string();

                state.session.active = true;
                state.session.error = None;
                state.session.resolution = Some(resolution);
                state.session.device = Some(device.clone());
                state.stream = Some(stream);
                state.sequence = 0;
                drop(state);

                info!("Camera started: {} at {}", device, resolution);
                self.shared.active_tx.send_replace(true);
                let _ = self
                    .shared
                    .event_tx
                    .send(CaptureEvent::Started { device, resolution });
                Ok(())
            }
            Err(e) => {
                state.session.error = Some(CAPTURE_ERROR_MESSAGE.to_string());
                drop(state);

                error!("Webcam error: {}", e);
                let _ = self.shared.event_tx.send(CaptureEvent::Failed {
                    message: CAPTURE_ERROR_MESSAGE.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Release the device. No-op when neither active nor starting.
    pub fn stop(&self) {
        let stream = {
            let mut state = self.shared.state.lock();
            if !state.session.active && !state.session.loading {
                return;
            }
            state.generation += 1;
            state.session.active = false;
            state.session.loading = false;
            state.session.resolution = None;
            state.session.device = None;
            state.stream.take()
        };

        self.shared.active_tx.send_replace(false);
        if let Some(mut stream) = stream {
            stream.release();
        }
        info!("Camera stopped");
        let _ = self.shared.event_tx.send(CaptureEvent::Stopped);
    }

    /// Sample the current picture and encode it at `quality` (0.0..=1.0)
    ///
    /// Returns `None` when inactive or when sampling or encoding fails.
    pub fn capture_frame(&self, quality: f32) -> Option<EncodedFrame> {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        if !state.session.active {
            return None;
        }
        let stream = state.stream.as_mut()?;

        let raw = match stream.current_frame() {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("No frame available yet");
                return None;
            }
            Err(MediaError::DeviceDisconnected { device_id }) => {
                state.generation += 1;
                state.session.active = false;
                state.session.resolution = None;
                state.session.device = None;
                let message = format!("Camera disconnected: {}", device_id);
                state.session.error = Some(message.clone());
                let stream = state.stream.take();
                drop(guard);

                warn!("{}", message);
                self.shared.active_tx.send_replace(false);
                if let Some(mut stream) = stream {
                    stream.release();
                }
                let _ = self.shared.event_tx.send(CaptureEvent::Failed { message });
                return None;
            }
            Err(e) => {
                debug!("Frame sample failed: {}", e);
                return None;
            }
        };

        state.sequence += 1;
        match state.encoder.encode(&raw, quality, state.sequence) {
            Ok(frame) => {
                state.stats.frames_captured += 1;
                state.stats.bytes_encoded += frame.len() as u64;
                state.stats.last_quality = Some(quality);
                Some(frame)
            }
            Err(e) => {
                debug!("Frame encode failed: {}", e);
                None
            }
        }
    }

    /// Whether the device is open
    pub fn is_active(&self) -> bool {
        self.shared.state.lock().session.active
    }

    /// Whether a start is in flight
    pub fn is_loading(&self) -> bool {
        self.shared.state.lock().session.loading
    }

    /// User-facing error from the last failed start
    pub fn error(&self) -> Option<String> {
        self.shared.state.lock().session.error.clone()
    }

    /// Get a session snapshot
    pub fn session(&self) -> CaptureSession {
        self.shared.state.lock().session.clone()
    }

    /// Get capture statistics
    pub fn stats(&self) -> CaptureStats {
        self.shared.state.lock().stats.clone()
    }

    /// Get the device request parameters
    pub fn config(&self) -> &CaptureConfig {
        &self.shared.config
    }

    /// Name of the backend in use
    pub fn backend_name(&self) -> &str {
        self.shared.backend.name()
    }

    /// Watch the active flag
    pub fn subscribe_active(&self) -> watch::Receiver<bool> {
        self.shared.active_tx.subscribe()
    }

    /// Subscribe to lifecycle events
    pub fn subscribe_events(&self) -> broadcast::Receiver<CaptureEvent> {
        self.shared.event_tx.subscribe()
    }
}
