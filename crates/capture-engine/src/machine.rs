//! Recording session lifecycle.
//!
//! ```text
//!          Start            Stop           Finalized
//!   Idle ─────────► Recording ─────► Stopping ─────► Idle
//!                    │    ▲             ▲
//!              Pause │    │ Resume      │ Stop
//!                    ▼    │             │
//!                    Paused ────────────┘
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

/// State of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No recording in progress (initial and final state).
    Idle,
    /// Frames and audio are being encoded.
    Recording,
    /// Producers keep running but nothing is encoded.
    Paused,
    /// Draining and finalizing output.
    Stopping,
}

/// Lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    Start,
    Stop,
    Pause,
    Resume,
    /// Output flushed and finalized.
    Finalized,
}

impl SessionState {
    pub const ALL: [SessionState; 4] = [
        SessionState::Idle,
        SessionState::Recording,
        SessionState::Paused,
        SessionState::Stopping,
    ];

    /// The state `event` leads to, or `None` if the move is illegal.
    pub fn next(self, event: SessionEvent) -> Option<SessionState> {
        use SessionEvent as E;
        use SessionState as S;

        match (self, event) {
            (S::Idle, E::Start) => Some(S::Recording),
            (S::Recording, E::Pause) => Some(S::Paused),
            (S::Recording, E::Stop) => Some(S::Stopping),
            (S::Paused, E::Resume) => Some(S::Recording),
            (S::Paused, E::Stop) => Some(S::Stopping),
            (S::Stopping, E::Finalized) => Some(S::Idle),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Recording => "Recording",
            SessionState::Paused => "Paused",
            SessionState::Stopping => "Stopping",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            SessionState::Idle => 0,
            SessionState::Recording => 1,
            SessionState::Paused => 2,
            SessionState::Stopping => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => SessionState::Recording,
            2 => SessionState::Paused,
            3 => SessionState::Stopping,
            _ => SessionState::Idle,
        }
    }
}

impl SessionEvent {
    pub const ALL: [SessionEvent; 5] = [
        SessionEvent::Start,
        SessionEvent::Stop,
        SessionEvent::Pause,
        SessionEvent::Resume,
        SessionEvent::Finalized,
    ];
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Observer invoked with `(old, new)` after every accepted transition.
pub type StateObserver = Box<dyn FnMut(SessionState, SessionState) + Send>;

/// Finite state machine for a recording session.
///
/// Not synchronized: one logical owner drives it.
pub struct SessionMachine {
    state: SessionState,
    observer: Option<StateObserver>,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            observer: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Attempt a transition. Returns `false` and leaves the state alone if
    /// `event` is illegal in the current state.
    pub fn transition(&mut self, event: SessionEvent) -> bool {
        let Some(next) = self.state.next(event) else {
            tracing::debug!(state = %self.state, ?event, "Rejected session transition");
            return false;
        };

        let old = self.state;
        self.state = next;
        tracing::debug!(from = %old, to = %next, ?event, "Session transition");
        if let Some(observer) = self.observer.as_mut() {
            observer(old, next);
        }
        true
    }

    pub fn set_observer(&mut self, observer: StateObserver) {
        self.observer = Some(observer);
    }

    pub fn is_idle(&self) -> bool {
        self.state == SessionState::Idle
    }

    pub fn is_recording(&self) -> bool {
        self.state == SessionState::Recording
    }

    pub fn is_paused(&self) -> bool {
        self.state == SessionState::Paused
    }

    pub fn is_stopping(&self) -> bool {
        self.state == SessionState::Stopping
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionMachine")
            .field("state", &self.state)
            .finish()
    }
}

/// Lock-free mirror of the machine state for threads that only read it.
#[derive(Debug)]
pub struct AtomicSessionState(AtomicU8);

impl AtomicSessionState {
    pub fn new(state: SessionState) -> Self {
        Self(AtomicU8::new(state.to_u8()))
    }

    pub fn load(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: SessionState) {
        self.0.store(state.to_u8(), Ordering::Release);
    }
}
