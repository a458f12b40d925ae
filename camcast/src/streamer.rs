//! Streamer: camera, connection and streaming loop behind one controller
//!
//! Every user control maps to one method. A supervisor task follows camera,
//! transport and loop notifications, keeps the session machine current and
//! republishes what happened as [`Event`]s.

use crate::config::{normalize_quality, validate_frame_rate, StreamSettings, StreamerConfig};
use crate::event::{Event, EventFilter, EventStream};
use crate::session::{SessionInput, SessionMachine, SessionState, Transition};
use crate::streaming::{LoopSignal, LoopStats, StreamingLoop};
use crate::{
    platform_backend, CamcastError, CamcastResult, CaptureBackend, CaptureEvent, CaptureSession,
    CaptureSource, CaptureStats, ChannelStats, ConnectionState, Dialer, MediaError,
    PayloadFormat, TransportChannel, TransportEvent, WebSocketDialer, CAPTURE_ERROR_MESSAGE,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Snapshot of everything the streamer tracks
#[derive(Debug, Clone, Serialize)]
pub struct StreamerStatus {
    /// Combined session state
    pub session: SessionState,
    /// Transport state
    pub connection: ConnectionState,
    /// Current or most recent endpoint
    pub address: Option<String>,
    /// Camera session
    pub camera: CaptureSession,
    /// Cadence and quality
    pub settings: StreamSettings,
    /// Wire format
    pub payload_format: PayloadFormat,
    /// Transport counters
    pub channel: ChannelStats,
    /// Capture counters
    pub capture: CaptureStats,
    /// Streaming loop counters
    pub streaming: LoopStats,
}

fn capture_unavailable(error: &MediaError) -> CamcastError {
    let reason = if error.is_access_failure() {
        CAPTURE_ERROR_MESSAGE.to_string()
    } else {
        error.to_string()
    };
    CamcastError::CaptureUnavailable { reason }
}

struct StreamerInner {
    config: StreamerConfig,
    capture: CaptureSource,
    transport: TransportChannel,
    streaming: StreamingLoop,
    session: Mutex<SessionMachine>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Event>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    shut_down: Mutex<bool>,
}

impl StreamerInner {
    fn emit(&self, event: Event) {
        debug!("Event: {}", event.event_type());
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    /// Carry out a session transition on the streaming loop
    fn execute(&self, transition: Transition) {
        match transition {
            Transition::None => {}
            Transition::Start => {
                if self.streaming.start() {
                    self.emit(Event::StreamingStarted {
                        settings: self.streaming.settings(),
                    });
                }
            }
            Transition::Stop(reason) => {
                if self.streaming.stop() {
                    self.emit(Event::StreamingStopped { reason });
                }
            }
            Transition::Rejected(reason) => {
                warn!("Streaming rejected: {}", reason);
                self.emit(Event::StreamRejected { reason });
            }
        }
    }

    /// Feed the live camera and connection state into the machine
    fn sync(&self, session: &mut SessionMachine) {
        let transition = session.apply(SessionInput::CaptureChanged(self.capture.is_active()));
        self.execute(transition);
        let transition = session.apply(SessionInput::ConnectionChanged(self.transport.state()));
        self.execute(transition);
    }

    fn on_transport_event(&self, event: TransportEvent) {
        {
            let mut session = self.session.lock();
            self.sync(&mut session);
        }

        match event {
            TransportEvent::Connecting { .. } => {}
            TransportEvent::Connected { address, .. } => {
                self.emit(Event::Connected { address });
            }
            TransportEvent::Closed {
                address,
                initiated_locally,
                ..
            } => {
                self.emit(Event::Disconnected {
                    address,
                    initiated_locally,
                });
            }
            TransportEvent::Failed { address, reason, .. } => {
                self.emit(Event::ConnectionFailed { address, reason });
            }
        }
    }

    fn on_capture_event(&self, event: CaptureEvent) {
        {
            let mut session = self.session.lock();
            self.sync(&mut session);
        }

        match event {
            CaptureEvent::Starting => {}
            CaptureEvent::Started { device, resolution } => {
                self.emit(Event::CameraStarted { device, resolution });
            }
            CaptureEvent::Stopped => self.emit(Event::CameraStopped),
            CaptureEvent::Failed { message } => self.emit(Event::CameraError { message }),
        }
    }

    fn on_loop_signal(&self, signal: LoopSignal) {
        match signal {
            LoopSignal::FailureLimitReached { emitter, failures } => {
                let mut session = self.session.lock();
                if self.streaming.emitter_id() != Some(emitter) {
                    debug!("Ignoring failure signal from replaced emitter {}", emitter);
                    return;
                }
                let transition = session.apply(SessionInput::FailureLimitReached { failures });
                self.execute(transition);
            }
        }
    }

    fn shutdown(&self) {
        {
            let mut shut_down = self.shut_down.lock();
            if *shut_down {
                return;
            }
            *shut_down = true;
        }

        if let Some(supervisor) = self.supervisor.lock().take() {
            supervisor.abort();
        }
        {
            let mut session = self.session.lock();
            let transition = session.apply(SessionInput::Shutdown);
            self.execute(transition);
        }
        // Unconditional: the loop may hold an emitter the machine never saw.
        self.streaming.stop();
        self.capture.stop();
        self.transport.disconnect();
        self.subscribers.lock().clear();
        info!("Streamer shut down");
    }
}

async fn supervise(
    inner: Weak<StreamerInner>,
    mut transport_events: broadcast::Receiver<TransportEvent>,
    mut capture_events: broadcast::Receiver<CaptureEvent>,
    mut signals: mpsc::UnboundedReceiver<LoopSignal>,
) {
    loop {
        tokio::select! {
            event = transport_events.recv() => {
                let Some(inner) = inner.upgrade() else { break };
                match event {
                    Ok(event) => inner.on_transport_event(event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Supervisor missed {} transport events", missed);
                        inner.sync(&mut inner.session.lock());
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            event = capture_events.recv() => {
                let Some(inner) = inner.upgrade() else { break };
                match event {
                    Ok(event) => inner.on_capture_event(event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Supervisor missed {} camera events", missed);
                        inner.sync(&mut inner.session.lock());
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            Some(signal) = signals.recv() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.on_loop_signal(signal);
            }
        }
    }
    debug!("Supervisor exited");
}

/// Webcam-to-WebSocket streaming controller
///
/// Must be created within a tokio runtime. Dropping the streamer shuts it down.
pub struct Streamer {
    inner: Arc<StreamerInner>,
}

impl std::fmt::Debug for Streamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Streamer")
            .field("capture", &self.inner.capture)
            .field("transport", &self.inner.transport)
            .field("streaming", &self.inner.streaming)
            .finish()
    }
}

impl Streamer {
    /// Create a streamer that dials real endpoints and opens the build's camera backend
    pub fn new(config: StreamerConfig) -> CamcastResult<Self> {
        Self::with_components(config, Arc::new(WebSocketDialer), platform_backend())
    }

    /// Create a streamer with a custom dialer and capture backend
    pub fn with_components(
        config: StreamerConfig,
        dialer: Arc<dyn Dialer>,
        backend: Arc<dyn CaptureBackend>,
    ) -> CamcastResult<Self> {
        config.validate()?;

        let transport = TransportChannel::with_dialer(config.connection.clone(), dialer);
        let capture = CaptureSource::new(backend, config.capture.clone());
        let (streaming, signals) = StreamingLoop::new(
            capture.clone(),
            transport.clone(),
            config.settings,
            config.payload_format,
            config.failure_policy,
        );

        let transport_events = transport.subscribe_events();
        let capture_events = capture.subscribe_events();

        let inner = Arc::new(StreamerInner {
            config,
            capture,
            transport,
            streaming,
            session: Mutex::new(SessionMachine::new()),
            subscribers: Mutex::new(Vec::new()),
            supervisor: Mutex::new(None),
            shut_down: Mutex::new(false),
        });

        let supervisor = tokio::spawn(supervise(
            Arc::downgrade(&inner),
            transport_events,
            capture_events,
            signals,
        ));
        *inner.supervisor.lock() = Some(supervisor);

        info!(
            "Streamer ready (camera backend: {})",
            inner.capture.backend_name()
        );
        Ok(Self { inner })
    }

    /// Open a connection to `address`, replacing any existing one
    pub fn connect(&self, address: &str) -> CamcastResult<Uuid> {
        {
            let mut session = self.inner.session.lock();
            if session.state() == SessionState::Streaming {
                let transition =
                    session.apply(SessionInput::ConnectionChanged(ConnectionState::Connecting));
                self.inner.execute(transition);
            }
        }

        self.inner.transport.connect(address).map_err(|e| {
            self.inner.emit(Event::ConnectionFailed {
                address: address.to_string(),
                reason: e.to_string(),
            });
            e
        })
    }

    /// Connect to the configured endpoint
    pub fn connect_default(&self) -> CamcastResult<Uuid> {
        match self.inner.config.endpoint.as_deref() {
            Some(endpoint) => self.connect(endpoint),
            None => Err(CamcastError::InvalidConfiguration {
                field: "endpoint".to_string(),
                reason: "no endpoint configured".to_string(),
            }),
        }
    }

    /// Close the connection, stopping any stream first
    pub fn disconnect(&self) {
        {
            let mut session = self.inner.session.lock();
            let transition =
                session.apply(SessionInput::ConnectionChanged(ConnectionState::Disconnected));
            self.inner.execute(transition);
        }
        self.inner.transport.disconnect();
    }

    /// Request camera access
    pub async fn start_camera(&self) -> CamcastResult<()> {
        self.inner
            .capture
            .start()
            .await
            .map_err(|e| capture_unavailable(&e))
    }

    /// Release the camera, stopping any stream first
    pub fn stop_camera(&self) {
        {
            let mut session = self.inner.session.lock();
            let transition = session.apply(SessionInput::CaptureChanged(false));
            self.inner.execute(transition);
        }
        self.inner.capture.stop();
    }

    /// Start the camera when off, stop it when on or starting
    ///
    /// Returns whether the camera is now active.
    pub async fn toggle_camera(&self) -> CamcastResult<bool> {
        if self.inner.capture.is_active() || self.inner.capture.is_loading() {
            self.stop_camera();
            Ok(false)
        } else {
            self.start_camera().await?;
            Ok(self.inner.capture.is_active())
        }
    }

    /// Start streaming when stopped, stop it when running
    ///
    /// Starting requires a connection and an active camera; otherwise the
    /// request is rejected and nothing changes. Returns whether streaming is now
    /// on.
    pub fn toggle_streaming(&self) -> CamcastResult<bool> {
        let mut session = self.inner.session.lock();
        self.inner.sync(&mut session);

        match session.apply(SessionInput::ToggleRequested) {
            Transition::Rejected(reason) => {
                self.inner.execute(Transition::Rejected(reason));
                Err(CamcastError::StreamRejected {
                    reason: reason.to_string(),
                })
            }
            transition => {
                self.inner.execute(transition);
                Ok(session.state() == SessionState::Streaming)
            }
        }
    }

    /// Change the frame rate (1-30 fps); a running stream restarts at the new cadence
    pub fn set_frame_rate(&self, frame_rate: u32) -> CamcastResult<()> {
        let frame_rate = validate_frame_rate(frame_rate)?;
        let _session = self.inner.session.lock();
        let settings = self.inner.streaming.settings().with_frame_rate(frame_rate)?;
        self.apply_settings(settings);
        Ok(())
    }

    /// Change the JPEG quality (0.10-1.00, snapped to 0.05); a running stream restarts
    pub fn set_quality(&self, quality: f32) -> CamcastResult<()> {
        let quality = normalize_quality(quality)?;
        let _session = self.inner.session.lock();
        let settings = self.inner.streaming.settings().with_quality(quality)?;
        self.apply_settings(settings);
        Ok(())
    }

    fn apply_settings(&self, settings: StreamSettings) {
        if self.inner.streaming.update_settings(settings) {
            info!(
                "Settings changed: {} fps, quality {:.2}",
                settings.frame_rate(),
                settings.quality()
            );
            self.inner.emit(Event::SettingsChanged { settings });
        }
    }

    /// Get a snapshot of the streamer
    pub fn status(&self) -> StreamerStatus {
        let camera = self.inner.capture.session();
        let connection = self.inner.transport.state();
        StreamerStatus {
            session: SessionState::derive(
                camera.active,
                connection,
                self.inner.streaming.is_running(),
            ),
            connection,
            address: self.inner.transport.address(),
            camera,
            settings: self.inner.streaming.settings(),
            payload_format: self.inner.streaming.format(),
            channel: self.inner.transport.stats(),
            capture: self.inner.capture.stats(),
            streaming: self.inner.streaming.stats(),
        }
    }

    /// Subscribe to events from now on
    pub fn events(&self) -> EventStream {
        self.events_filtered(EventFilter::all())
    }

    /// Subscribe to events matching `filter`
    pub fn events_filtered(&self, filter: EventFilter) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().push(tx);
        EventStream::filtered(rx, filter)
    }

    /// Whether frames are being sent
    pub fn is_streaming(&self) -> bool {
        self.inner.streaming.is_running()
    }

    /// Current settings
    pub fn settings(&self) -> StreamSettings {
        self.inner.streaming.settings()
    }

    /// Get the configuration the streamer was built with
    pub fn config(&self) -> &StreamerConfig {
        &self.inner.config
    }

    /// Camera handle
    pub fn capture(&self) -> &CaptureSource {
        &self.inner.capture
    }

    /// Transport handle
    pub fn transport(&self) -> &TransportChannel {
        &self.inner.transport
    }

    /// Stop streaming, release the camera and disconnect. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}
