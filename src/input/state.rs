//! Input worker state machine
//!
//! Tracks an input worker from start to stop across reader sessions.
//!
//! ```text
//! Init ─► Waiting ─► Binding ─► Reading ─► Teardown ─┐     (UDP)
//! Init ─────────────────────► Accepting ─► Reading ─► Teardown ─┐     (TCP)
//!            ▲                    ▲                       │
//!            └────────────────────┴───────────────────────┘
//!                        any phase ─► Stopped
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

/// Input worker lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputPhase {
    /// Created, not running yet
    Init,
    /// UDP: no connection wants data, nothing is bound
    Waiting,
    /// UDP: binding the socket
    Binding,
    /// TCP: waiting for the source to connect
    Accepting,
    /// A session is producing units
    Reading,
    /// The session ended and is being torn down
    Teardown,
    /// Terminal
    Stopped,
}

impl fmt::Display for InputPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InputPhase::Init => "init",
            InputPhase::Waiting => "waiting",
            InputPhase::Binding => "binding",
            InputPhase::Accepting => "accepting",
            InputPhase::Reading => "reading",
            InputPhase::Teardown => "teardown",
            InputPhase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Complete input state
#[derive(Debug)]
pub struct InputState {
    /// Current phase
    pub phase: InputPhase,

    /// Sessions started so far
    pub sessions: u64,

    /// Source of the current session
    pub peer: Option<SocketAddr>,

    /// Start of the current session
    pub session_started_at: Option<Instant>,

    /// Why the previous session ended
    pub last_error: Option<String>,
}

impl InputState {
    pub fn new() -> Self {
        Self {
            phase: InputPhase::Init,
            sessions: 0,
            peer: None,
            session_started_at: None,
            last_error: None,
        }
    }

    /// Enter a phase that does not start a session
    pub fn enter(&mut self, phase: InputPhase) {
        if self.phase != InputPhase::Stopped {
            self.phase = phase;
        }
    }

    /// A new session started reading
    pub fn start_session(&mut self, peer: Option<SocketAddr>) {
        if self.phase == InputPhase::Stopped {
            return;
        }
        self.phase = InputPhase::Reading;
        self.sessions += 1;
        self.peer = peer;
        self.session_started_at = Some(Instant::now());
    }

    /// The current session ended, with an error description if it failed
    pub fn end_session(&mut self, error: Option<String>) {
        if self.phase == InputPhase::Stopped {
            return;
        }
        self.phase = InputPhase::Teardown;
        self.peer = None;
        self.session_started_at = None;
        if error.is_some() {
            self.last_error = error;
        }
    }

    pub fn stop(&mut self) {
        self.phase = InputPhase::Stopped;
        self.peer = None;
        self.session_started_at = None;
    }

    pub fn is_reading(&self) -> bool {
        self.phase == InputPhase::Reading
    }
}

impl Default for InputState {
    fn default() -> Self {
        Self::new()
    }
}
