//! Combined camera/connection/streaming state
//!
//! [`SessionMachine`] decides when the streaming emitter may run. It is fed the
//! camera's active flag, the transport's connection state and user toggles, and
//! answers with the [`Transition`] the caller must carry out.

use crate::event::{RejectReason, StopReason};
use crate::ConnectionState;
use serde::Serialize;

/// Combined session state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    /// Camera inactive or not connected
    #[default]
    Idle,
    /// Camera active and connected, not streaming
    Ready,
    /// Emitter running
    Streaming,
}

impl SessionState {
    /// State implied by the raw flags
    pub fn derive(capture_active: bool, connection: ConnectionState, streaming: bool) -> Self {
        if streaming {
            SessionState::Streaming
        } else if capture_active && connection == ConnectionState::Connected {
            SessionState::Ready
        } else {
            SessionState::Idle
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SessionState::Idle => "Idle",
            SessionState::Ready => "Ready",
            SessionState::Streaming => "Streaming",
        };
        f.write_str(label)
    }
}

/// Inputs to the session machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionInput {
    /// Camera active flag observed
    CaptureChanged(bool),
    /// Connection state observed
    ConnectionChanged(ConnectionState),
    /// User asked to flip streaming
    ToggleRequested,
    /// The emitter hit the send failure limit
    FailureLimitReached {
        /// Failed sends counted
        failures: u32,
    },
    /// The owner is going away
    Shutdown,
}

/// What the caller must do to the emitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing
    None,
    /// Spawn the emitter
    Start,
    /// Cancel the emitter
    Stop(StopReason),
    /// Refuse the toggle; state unchanged
    Rejected(RejectReason),
}

/// Explicit session state machine
#[derive(Debug, Clone)]
pub struct SessionMachine {
    capture_active: bool,
    connection: ConnectionState,
    state: SessionState,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    /// Start idle: camera off, disconnected
    pub fn new() -> Self {
        Self {
            capture_active: false,
            connection: ConnectionState::Disconnected,
            state: SessionState::Idle,
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Last observed camera flag
    pub fn capture_active(&self) -> bool {
        self.capture_active
    }

    /// Last observed connection state
    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Whether streaming is allowed to start
    pub fn preconditions_met(&self) -> bool {
        self.capture_active && self.connection == ConnectionState::Connected
    }

    /// Feed one input
    pub fn apply(&mut self, input: SessionInput) -> Transition {
        let streaming = self.state == SessionState::Streaming;

        match input {
            SessionInput::CaptureChanged(active) => {
                self.capture_active = active;
                if streaming && !active {
                    self.settle();
                    return Transition::Stop(StopReason::CameraStopped);
                }
            }
            SessionInput::ConnectionChanged(connection) => {
                self.connection = connection;
                if streaming && connection != ConnectionState::Connected {
                    self.settle();
                    return Transition::Stop(StopReason::ConnectionLost);
                }
            }
            SessionInput::ToggleRequested => {
                if streaming {
                    self.settle();
                    return Transition::Stop(StopReason::UserRequested);
                }
                if self.connection != ConnectionState::Connected {
                    return Transition::Rejected(RejectReason::NotConnected);
                }
                if !self.capture_active {
                    return Transition::Rejected(RejectReason::CameraInactive);
                }
                self.state = SessionState::Streaming;
                return Transition::Start;
            }
            SessionInput::FailureLimitReached { failures } => {
                if streaming {
                    self.settle();
                    return Transition::Stop(StopReason::RepeatedSendFailures { failures });
                }
            }
            SessionInput::Shutdown => {
                self.capture_active = false;
                self.connection = ConnectionState::Disconnected;
                self.settle();
                if streaming {
                    return Transition::Stop(StopReason::Shutdown);
                }
            }
        }

        if !streaming {
            self.settle();
        }
        Transition::None
    }

    fn settle(&mut self) {
        self.state = SessionState::derive(self.capture_active, self.connection, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready() -> SessionMachine {
        let mut machine = SessionMachine::new();
        machine.apply(SessionInput::CaptureChanged(true));
        machine.apply(SessionInput::ConnectionChanged(ConnectionState::Connected));
        machine
    }

    #[test]
    fn test_preconditions_reach_ready() {
        let mut machine = SessionMachine::new();
        assert_eq!(machine.state(), SessionState::Idle);

        assert_eq!(
            machine.apply(SessionInput::CaptureChanged(true)),
            Transition::None
        );
        assert_eq!(machine.state(), SessionState::Idle);

        machine.apply(SessionInput::ConnectionChanged(ConnectionState::Connecting));
        assert_eq!(machine.state(), SessionState::Idle);

        machine.apply(SessionInput::ConnectionChanged(ConnectionState::Connected));
        assert_eq!(machine.state(), SessionState::Ready);
        assert!(machine.preconditions_met());
    }

    #[test]
    fn test_toggle_rejections_leave_state() {
        let mut machine = SessionMachine::new();
        assert_eq!(
            machine.apply(SessionInput::ToggleRequested),
            Transition::Rejected(RejectReason::NotConnected)
        );

        // Connection is checked before the camera.
        machine.apply(SessionInput::ConnectionChanged(ConnectionState::Connected));
        assert_eq!(
            machine.apply(SessionInput::ToggleRequested),
            Transition::Rejected(RejectReason::CameraInactive)
        );
        assert_eq!(machine.state(), SessionState::Idle);

        let mut camera_only = SessionMachine::new();
        camera_only.apply(SessionInput::CaptureChanged(true));
        assert_eq!(
            camera_only.apply(SessionInput::ToggleRequested),
            Transition::Rejected(RejectReason::NotConnected)
        );
    }

    #[test]
    fn test_toggle_on_and_off() {
        let mut machine = ready();
        assert_eq!(machine.apply(SessionInput::ToggleRequested), Transition::Start);
        assert_eq!(machine.state(), SessionState::Streaming);

        assert_eq!(
            machine.apply(SessionInput::ToggleRequested),
            Transition::Stop(StopReason::UserRequested)
        );
        assert_eq!(machine.state(), SessionState::Ready);
    }

    #[test]
    fn test_losing_preconditions_stops() {
        let mut machine = ready();
        machine.apply(SessionInput::ToggleRequested);
        assert_eq!(
            machine.apply(SessionInput::CaptureChanged(false)),
            Transition::Stop(StopReason::CameraStopped)
        );
        assert_eq!(machine.state(), SessionState::Idle);

        let mut machine = ready();
        machine.apply(SessionInput::ToggleRequested);
        assert_eq!(
            machine.apply(SessionInput::ConnectionChanged(ConnectionState::Disconnected)),
            Transition::Stop(StopReason::ConnectionLost)
        );
        assert_eq!(machine.state(), SessionState::Idle);

        // Repeating the observation is harmless.
        assert_eq!(
            machine.apply(SessionInput::ConnectionChanged(ConnectionState::Disconnected)),
            Transition::None
        );
    }

    #[test]
    fn test_failure_limit_only_when_streaming() {
        let mut machine = ready();
        assert_eq!(
            machine.apply(SessionInput::FailureLimitReached { failures: 30 }),
            Transition::None
        );

        machine.apply(SessionInput::ToggleRequested);
        assert_eq!(
            machine.apply(SessionInput::FailureLimitReached { failures: 30 }),
            Transition::Stop(StopReason::RepeatedSendFailures { failures: 30 })
        );
        assert_eq!(machine.state(), SessionState::Ready);
    }

    #[test]
    fn test_shutdown() {
        let mut machine = ready();
        machine.apply(SessionInput::ToggleRequested);
        assert_eq!(
            machine.apply(SessionInput::Shutdown),
            Transition::Stop(StopReason::Shutdown)
        );
        assert_eq!(machine.state(), SessionState::Idle);
        assert_eq!(machine.apply(SessionInput::Shutdown), Transition::None);
    }

    #[test]
    fn test_derive() {
        assert_eq!(
            SessionState::derive(true, ConnectionState::Connected, false),
            SessionState::Ready
        );
        assert_eq!(
            SessionState::derive(false, ConnectionState::Connected, true),
            SessionState::Streaming
        );
        assert_eq!(
            SessionState::derive(true, ConnectionState::Connecting, false),
            SessionState::Idle
        );
    }
}
