//! Live Controller error types.
//!
//! Every error maps to a stable wire code carried in `error` frames.
//! Internal details are logged server-side but not exposed to clients.

use thiserror::Error;

use crate::media::MediaAcquisitionError;

/// Live Controller error type.
#[derive(Debug, Error)]
pub enum LiveError {
    /// Broadcaster already owns an active session.
    #[error("Session conflict: {0}")]
    SessionConflict(String),

    /// Session does not exist (or has been garbage-collected).
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Caller is not allowed to perform this operation on the session.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Operation requires a live session.
    #[error("Session not live: {0}")]
    SessionNotLive(String),

    /// Operation is disabled by the session's settings.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Signaling message cannot be applied in the current negotiation state.
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// Local media capture failed on the broadcaster's device.
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(#[from] MediaAcquisitionError),

    /// An awaited response did not arrive in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Transport-level failure (socket closed, send failed).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request payload failed validation.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Server or session is at capacity.
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Server is draining (graceful shutdown).
    #[error("Server is draining")]
    Draining,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LiveError {
    /// Returns the stable wire code carried in `error` frames.
    #[must_use]
    pub fn wire_code(&self) -> &'static str {
        match self {
            LiveError::SessionConflict(_) => "session_conflict",
            LiveError::NotFound(_) => "not_found",
            LiveError::Unauthorized(_) => "unauthorized",
            LiveError::SessionNotLive(_) => "session_not_live",
            LiveError::Forbidden(_) => "forbidden",
            LiveError::Negotiation(_) => "negotiation_error",
            LiveError::MediaAcquisition(_) => "media_error",
            LiveError::Timeout(_) => "timeout",
            LiveError::Transport(_) => "transport_error",
            LiveError::InvalidRequest(_) => "invalid_request",
            LiveError::CapacityExceeded(_) => "capacity_exceeded",
            LiveError::Draining => "draining",
            LiveError::Internal(_) => "internal_error",
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            LiveError::Internal(_) | LiveError::Transport(_) => {
                "An internal error occurred".to_string()
            }
            LiveError::SessionConflict(_) => "You already have an active stream".to_string(),
            LiveError::NotFound(_) => "Stream not found".to_string(),
            LiveError::Unauthorized(_) => "Only the broadcaster can do that".to_string(),
            LiveError::SessionNotLive(_) => "Stream is not live".to_string(),
            LiveError::Timeout(_) => "The operation timed out".to_string(),
            LiveError::Draining => "Server is shutting down, please reconnect".to_string(),
            LiveError::CapacityExceeded(_) => "Server is at capacity, please try again".to_string(),
            LiveError::MediaAcquisition(e) => e.user_message().to_string(),
            LiveError::Forbidden(msg)
            | LiveError::Negotiation(msg)
            | LiveError::InvalidRequest(msg) => msg.clone(),
        }
    }
}
