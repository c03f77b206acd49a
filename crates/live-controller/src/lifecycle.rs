//! Session lifecycle state machine.
//!
//! Transitions are pure so every caller (session actor, tests) goes through
//! the same legality check. The actor owns side effects; this module owns
//! which moves are legal.

use serde::{Deserialize, Serialize};

use crate::errors::LiveError;

/// Phase of a broadcast session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    /// Created but not yet started
    Idle,
    /// Start accepted, waiting on broadcaster media
    Starting,
    /// Accepting viewers and events
    Live,
    /// Stop in progress, final events being delivered
    Ending,
    /// Terminal: ended normally, retained until garbage collection
    Ended,
    /// Terminal: media failure or broadcaster loss before going live
    Failed,
}

/// Inputs that drive a session between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Registry accepted the start request
    Start,
    /// Broadcaster's local capture is ready
    MediaReady,
    /// Broadcaster's local capture failed
    MediaFailed,
    /// Broadcaster (or grace-timer) requested a stop
    Stop,
    /// Final fan-out delivered, session record sealed
    Finalize,
}

impl SessionPhase {
    /// Apply a lifecycle event, returning the next phase.
    ///
    /// # Errors
    ///
    /// Returns `LiveError::SessionNotLive` when the event is not legal in
    /// the current phase.
    pub fn transition(self, event: LifecycleEvent) -> Result<SessionPhase, LiveError> {
        use LifecycleEvent as E;
        use SessionPhase as P;

        match (self, event) {
            (P::Idle, E::Start) => Ok(P::Starting),
            (P::Starting, E::MediaReady) => Ok(P::Live),
            (P::Starting, E::MediaFailed) => Ok(P::Failed),
            (P::Starting | P::Live, E::Stop) => Ok(P::Ending),
            (P::Ending, E::Finalize) => Ok(P::Ended),
            (phase, event) => Err(LiveError::SessionNotLive(format!(
                "cannot apply {event:?} in phase {phase:?}"
            ))),
        }
    }

    /// Viewers may join only while live.
    #[must_use]
    pub const fn accepts_viewers(self) -> bool {
        matches!(self, SessionPhase::Live)
    }

    /// True once no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Ended | SessionPhase::Failed)
    }

    /// Stable name for logs and metrics labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Starting => "starting",
            SessionPhase::Live => "live",
            SessionPhase::Ending => "ending",
            SessionPhase::Ended => "ended",
            SessionPhase::Failed => "failed",
        }
    }
}
