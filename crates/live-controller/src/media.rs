//! Local media capture contract.
//!
//! Capture itself happens on the broadcaster's device; the controller only
//! models the outcome. The trait exists so the session lifecycle can be
//! driven (and tested) against capture success and failure without a real
//! device behind it.

use thiserror::Error;

/// Kind of a captured media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Why local capture failed.
#[derive(Debug, Error)]
pub enum MediaAcquisitionError {
    /// User denied camera/microphone permission.
    #[error("Media permission denied")]
    PermissionDenied,

    /// No usable capture device was found.
    #[error("No capture device: {0}")]
    DeviceUnavailable(String),

    /// Device exists but is held by another application.
    #[error("Capture device busy: {0}")]
    DeviceBusy(String),
}

impl MediaAcquisitionError {
    /// Actionable message shown to the broadcaster.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            MediaAcquisitionError::PermissionDenied => {
                "Camera and microphone permission is required to go live. \
                 Enable it in your device settings and try again."
            }
            MediaAcquisitionError::DeviceUnavailable(_) => {
                "No camera or microphone was found on this device."
            }
            MediaAcquisitionError::DeviceBusy(_) => {
                "Your camera or microphone is in use by another app. \
                 Close it and try again."
            }
        }
    }
}

/// Handle to an acquired local stream.
#[derive(Debug, Clone)]
pub struct LocalStreamHandle {
    /// Device-local stream identifier
    pub stream_id: String,
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

/// Contract for broadcaster-side capture control.
pub trait LocalMediaController {
    /// Acquire camera and microphone for broadcasting.
    ///
    /// # Errors
    ///
    /// Returns an error when permission is denied or no device is usable.
    fn acquire(&mut self) -> Result<LocalStreamHandle, MediaAcquisitionError>;

    /// Release all captured tracks. Idempotent.
    fn release(&mut self);

    /// Mute/unmute a track without renegotiating.
    fn set_track_enabled(&mut self, kind: TrackKind, enabled: bool);
}
