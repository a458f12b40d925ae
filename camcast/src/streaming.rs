//! Periodic frame emitter
//!
//! While running, a single emitter task wakes every frame interval, samples one
//! frame from the capture source and hands it to the transport. Settings changes
//! swap the emitter under the loop's lock, so two emitters never overlap.

use crate::config::{FailurePolicy, PayloadFormat, StreamSettings};
use crate::event::RejectReason;
use crate::{CaptureSource, TransportChannel};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Streaming loop counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    /// Emitters spawned
    pub emitters_created: u64,
    /// Emitters cancelled
    pub emitters_cancelled: u64,
    /// Ticks run by live emitters
    pub ticks: u64,
    /// Frames accepted by the transport
    pub frames_sent: u64,
    /// Frames the transport refused
    pub send_failures: u64,
    /// Refused frames since the last accepted one
    pub consecutive_send_failures: u32,
}

/// Notifications from emitters to the loop's owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopSignal {
    /// An emitter stopped sending after too many failures
    FailureLimitReached {
        /// Emitter that gave up
        emitter: u64,
        /// Failed sends counted
        failures: u32,
    },
}

/// Owned handle to the live emitter
#[derive(Debug)]
pub struct EmitterHandle {
    id: u64,
    alive: Arc<Mutex<bool>>,
    task: JoinHandle<()>,
}

impl EmitterHandle {
    /// Emitter identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the emitter may still send
    pub fn is_alive(&self) -> bool {
        *self.alive.lock()
    }

    /// Stop the emitter; a tick already past its capture will not send
    pub fn cancel(self) {
        *self.alive.lock() = false;
        self.task.abort();
    }
}

enum TickOutcome {
    Sent,
    NoFrame,
    SendFailed,
    Cancelled,
    LimitReached(u32),
}

struct LoopState {
    settings: StreamSettings,
    emitter: Option<EmitterHandle>,
    next_id: u64,
}

struct LoopInner {
    capture: CaptureSource,
    transport: TransportChannel,
    format: PayloadFormat,
    policy: FailurePolicy,
    state: Mutex<LoopState>,
    stats: Mutex<LoopStats>,
    signal_tx: mpsc::UnboundedSender<LoopSignal>,
}

impl Drop for LoopInner {
    fn drop(&mut self) {
        if let Some(emitter) = self.state.get_mut().emitter.take() {
            emitter.cancel();
        }
    }
}

impl LoopInner {
    fn tick(&self, alive: &Mutex<bool>, quality: f32) -> TickOutcome {
        if !*alive.lock() {
            return TickOutcome::Cancelled;
        }
        self.stats.lock().ticks += 1;

        let Some(frame) = self.capture.capture_frame(quality) else {
            debug!("Tick skipped: no frame");
            return TickOutcome::NoFrame;
        };
        let payload = self.format.encode(&frame);

        let sent = {
            let alive = alive.lock();
            if !*alive {
                return TickOutcome::Cancelled;
            }
            self.transport.send(payload)
        };

        let mut stats = self.stats.lock();
        if sent {
            stats.frames_sent += 1;
            stats.consecutive_send_failures = 0;
            debug!("Sent frame {} ({} bytes)", frame.sequence, frame.len());
            return TickOutcome::Sent;
        }

        stats.send_failures += 1;
        stats.consecutive_send_failures += 1;
        let failures = stats.consecutive_send_failures;
        debug!("Frame {} not sent ({} in a row)", frame.sequence, failures);
        if self.policy.exceeded(failures) {
            TickOutcome::LimitReached(failures)
        } else {
            TickOutcome::SendFailed
        }
    }

    fn spawn_emitter(self: &Arc<Self>, state: &mut LoopState) {
        state.next_id += 1;
        let id = state.next_id;
        let alive = Arc::new(Mutex::new(true));
        let task = tokio::spawn(run_emitter(
            Arc::downgrade(self),
            id,
            alive.clone(),
            state.settings,
        ));

        state.emitter = Some(EmitterHandle { id, alive, task });
        let mut stats = self.stats.lock();
        stats.emitters_created += 1;
        stats.consecutive_send_failures = 0;
        debug!(
            "Emitter {} started at {} fps, quality {:.2}",
            id,
            state.settings.frame_rate(),
            state.settings.quality()
        );
    }

    fn cancel_emitter(&self, state: &mut LoopState) -> bool {
        match state.emitter.take() {
            Some(emitter) => {
                debug!("Emitter {} cancelled", emitter.id());
                emitter.cancel();
                self.stats.lock().emitters_cancelled += 1;
                true
            }
            None => false,
        }
    }
}

async fn run_emitter(
    inner: Weak<LoopInner>,
    id: u64,
    alive: Arc<Mutex<bool>>,
    settings: StreamSettings,
) {
    let period = settings.frame_interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };

        match inner.tick(&alive, settings.quality()) {
            TickOutcome::Sent | TickOutcome::NoFrame | TickOutcome::SendFailed => {}
            TickOutcome::Cancelled => break,
            TickOutcome::LimitReached(failures) => {
                *alive.lock() = false;
                warn!(
                    "Emitter {} giving up after {} failed sends",
                    id, failures
                );
                let _ = inner
                    .signal_tx
                    .send(LoopSignal::FailureLimitReached { emitter: id, failures });
                break;
            }
        }
    }
}

/// Periodic capture-and-send loop
///
/// Cloning yields another handle to the same loop. Starting the loop spawns a
/// task and must happen within a tokio runtime.
#[derive(Clone)]
pub struct StreamingLoop {
    inner: Arc<LoopInner>,
}

impl std::fmt::Debug for StreamingLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("StreamingLoop")
            .field("settings", &state.settings)
            .field("emitter", &state.emitter.as_ref().map(EmitterHandle::id))
            .finish()
    }
}

impl StreamingLoop {
    /// Create a stopped loop and the receiver for its signals
    pub fn new(
        capture: CaptureSource,
        transport: TransportChannel,
        settings: StreamSettings,
        format: PayloadFormat,
        policy: FailurePolicy,
    ) -> (Self, mpsc::UnboundedReceiver<LoopSignal>) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(LoopInner {
            capture,
            transport,
            format,
            policy,
            state: Mutex::new(LoopState {
                settings,
                emitter: None,
                next_id: 0,
            }),
            stats: Mutex::new(LoopStats::default()),
            signal_tx,
        });
        (Self { inner }, signal_rx)
    }

    /// Flip streaming after checking the connection, then the camera
    ///
    /// Returns whether the loop is now running.
    pub fn toggle(&self) -> Result<bool, RejectReason> {
        if self.is_running() {
            self.stop();
            return Ok(false);
        }
        if !self.inner.transport.is_connected() {
            return Err(RejectReason::NotConnected);
        }
        if !self.inner.capture.is_active() {
            return Err(RejectReason::CameraInactive);
        }
        self.start();
        Ok(true)
    }

    /// Spawn the emitter unless one is running
    ///
    /// Returns false when already running.
    pub fn start(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.emitter.is_some() {
            return false;
        }
        self.inner.spawn_emitter(&mut state);
        info!("Streaming started");
        true
    }

    /// Cancel the emitter
    ///
    /// Returns false when not running.
    pub fn stop(&self) -> bool {
        let mut state = self.inner.state.lock();
        let stopped = self.inner.cancel_emitter(&mut state);
        if stopped {
            info!("Streaming stopped");
        }
        stopped
    }

    /// Replace the settings, restarting a running emitter
    ///
    /// Returns false when `settings` equals the current ones.
    pub fn update_settings(&self, settings: StreamSettings) -> bool {
        let mut state = self.inner.state.lock();
        if state.settings == settings {
            return false;
        }
        state.settings = settings;
        if self.inner.cancel_emitter(&mut state) {
            self.inner.spawn_emitter(&mut state);
        }
        true
    }

    /// Whether an emitter is installed
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().emitter.is_some()
    }

    /// Identifier of the installed emitter
    pub fn emitter_id(&self) -> Option<u64> {
        self.inner.state.lock().emitter.as_ref().map(EmitterHandle::id)
    }

    /// Current settings
    pub fn settings(&self) -> StreamSettings {
        self.inner.state.lock().settings
    }

    /// Wire format of frames
    pub fn format(&self) -> PayloadFormat {
        self.inner.format
    }

    /// Get loop counters
    pub fn stats(&self) -> LoopStats {
        self.inner.stats.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CaptureBackend, CaptureConfig, ConnectionConfig, ConnectionState, MemoryDialer,
        SyntheticBackend, VideoResolution,
    };
    use async_trait::async_trait;
    use camcast_media::{CaptureStream, MediaResult, RawFrame};
    use std::time::Duration;

    type LoopSlot = Arc<Mutex<Option<StreamingLoop>>>;

    /// Synthetic camera that stops the loop while a frame is being sampled
    struct StopWhileSampling {
        inner: SyntheticBackend,
        streaming: LoopSlot,
    }

    struct StopWhileSamplingStream {
        inner: Box<dyn CaptureStream>,
        streaming: LoopSlot,
    }

    #[async_trait]
    impl CaptureBackend for StopWhileSampling {
        fn name(&self) -> &str {
            "stop-while-sampling"
        }

        async fn open(&self, config: &CaptureConfig) -> MediaResult<Box<dyn CaptureStream>> {
            let inner = self.inner.open(config).await?;
            Ok(Box::new(StopWhileSamplingStream {
                inner,
                streaming: self.streaming.clone(),
            }))
        }
    }

    impl CaptureStream for StopWhileSamplingStream {
        fn resolution(&self) -> VideoResolution {
            self.inner.resolution()
        }

        fn device_name(&self) -> &str {
            self.inner.device_name()
        }

        fn current_frame(&mut self) -> MediaResult<Option<RawFrame>> {
            let frame = self.inner.current_frame();
            if let Some(streaming) = self.streaming.lock().as_ref() {
                streaming.stop();
            }
            frame
        }

        fn release(&mut self) {
            self.inner.release();
        }
    }

    fn idle_loop() -> (StreamingLoop, mpsc::UnboundedReceiver<LoopSignal>) {
        let capture = CaptureSource::new(
            Arc::new(SyntheticBackend::new()),
            CaptureConfig {
                resolution: VideoResolution::new(16, 12),
                ..CaptureConfig::default()
            },
        );
        StreamingLoop::new(
            capture,
            TransportChannel::default(),
            StreamSettings::default(),
            PayloadFormat::DataUrl,
            FailurePolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_toggle_rejected_when_disconnected() {
        let (streaming, _signals) = idle_loop();
        assert_eq!(streaming.toggle(), Err(RejectReason::NotConnected));
        assert!(!streaming.is_running());
        assert_eq!(streaming.stats().emitters_created, 0);
    }

    #[tokio::test]
    async fn test_start_stop_counts() {
        let (streaming, _signals) = idle_loop();
        assert!(streaming.start());
        assert!(!streaming.start());
        assert_eq!(streaming.emitter_id(), Some(1));

        assert!(streaming.stop());
        assert!(!streaming.stop());

        let stats = streaming.stats();
        assert_eq!(stats.emitters_created, 1);
        assert_eq!(stats.emitters_cancelled, 1);
    }

    #[tokio::test]
    async fn test_update_settings_restarts_running_emitter() {
        let (streaming, _signals) = idle_loop();
        let faster = StreamSettings::new(30, 0.5).unwrap();

        // Stopped: settings change without spawning.
        assert!(streaming.update_settings(faster));
        assert_eq!(streaming.stats().emitters_created, 0);
        assert!(!streaming.update_settings(faster));

        streaming.start();
        assert!(streaming.update_settings(StreamSettings::default()));
        assert_eq!(streaming.emitter_id(), Some(2));

        let stats = streaming.stats();
        assert_eq!(stats.emitters_created, 2);
        assert_eq!(stats.emitters_cancelled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_capture_sends_nothing() {
        let dialer = MemoryDialer::new();
        let transport =
            TransportChannel::with_dialer(ConnectionConfig::default(), Arc::new(dialer.clone()));
        transport.connect("ws://localhost:9000").unwrap();
        transport
            .wait_for_state(ConnectionState::Connected, Duration::from_secs(5))
            .await
            .unwrap();

        let slot: LoopSlot = Arc::new(Mutex::new(None));
        let backend = StopWhileSampling {
            inner: SyntheticBackend::new(),
            streaming: slot.clone(),
        };
        let capture = CaptureSource::new(
            Arc::new(backend),
            CaptureConfig {
                resolution: VideoResolution::new(16, 12),
                ..CaptureConfig::default()
            },
        );
        capture.start().await.unwrap();

        let (streaming, _signals) = StreamingLoop::new(
            capture.clone(),
            transport.clone(),
            StreamSettings::default(),
            PayloadFormat::DataUrl,
            FailurePolicy::default(),
        );
        *slot.lock() = Some(streaming.clone());

        assert!(streaming.start());
        tokio::time::sleep(Duration::from_millis(500)).await;

        // The one tick captured a frame, then found its emitter cancelled.
        assert!(!streaming.is_running());
        assert_eq!(capture.stats().frames_captured, 1);
        let stats = streaming.stats();
        assert_eq!(stats.ticks, 1);
        assert_eq!(stats.frames_sent, 0);
        assert_eq!(stats.send_failures, 0);
        assert_eq!(transport.stats().payloads_sent, 0);
        assert!(dialer.last_peer().unwrap().received().is_empty());

        slot.lock().take();
    }

    #[tokio::test]
    async fn test_emitter_handle_cancel() {
        let alive = Arc::new(Mutex::new(true));
        let handle = EmitterHandle {
            id: 7,
            alive: alive.clone(),
            task: tokio::spawn(std::future::pending()),
        };
        assert!(handle.is_alive());
        handle.cancel();
        assert!(!*alive.lock());
    }
}
