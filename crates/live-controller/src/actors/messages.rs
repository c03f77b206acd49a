//! Message types for the registry and session actors.
//!
//! Every request that needs an answer carries a `respond_to` oneshot; the
//! rest are fire-and-forget notifications.

use signal_protocol::{IceCandidate, PeerConnectionState, SessionDescription, StreamMeta, StreamSettings};
use tokio::sync::oneshot;

use super::session::SessionActorHandle;
use crate::errors::LiveError;
use crate::fanout::FrameSink;
use crate::lifecycle::SessionPhase;

/// Point-in-time view of one session, safe to hand outside the actor.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub broadcaster_id: String,
    pub broadcaster_name: String,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub is_private: bool,
    pub settings: StreamSettings,
    pub phase: SessionPhase,
    pub viewer_count: usize,
    /// Milliseconds since epoch
    pub started_at: i64,
    pub ended_at: Option<i64>,
}

impl SessionSnapshot {
    /// Convert to the wire metadata clients see.
    #[must_use]
    pub fn to_meta(&self) -> StreamMeta {
        StreamMeta {
            id: self.session_id.clone(),
            streamer_id: self.broadcaster_id.clone(),
            streamer_name: self.broadcaster_name.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            category: self.category.clone(),
            tags: self.tags.clone(),
            is_private: self.is_private,
            viewer_count: self.viewer_count,
            is_live: self.phase == SessionPhase::Live,
            started_at: self.started_at,
            ended_at: self.ended_at,
            settings: self.settings,
        }
    }
}

/// Successful join response for a viewer.
#[derive(Debug, Clone)]
pub struct JoinAck {
    /// Session metadata at join time
    pub meta: StreamMeta,
    /// Audience size including the new viewer
    pub viewer_count: usize,
}

/// Result of creating a session through the registry.
pub struct CreateSessionResult {
    /// Handle for direct session operations
    pub handle: SessionActorHandle,
    /// Snapshot right after creation (phase `Starting`)
    pub snapshot: SessionSnapshot,
    /// True if an existing session was resumed within the broadcaster
    /// grace window instead of a new one being created.
    pub resumed: bool,
}

/// Current registry status for health reporting.
#[derive(Debug, Clone)]
pub struct RegistryStatus {
    pub session_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}

/// Messages handled by the `RegistryActor`.
pub enum RegistryMessage {
    /// Open a new session for a broadcaster.
    CreateSession {
        broadcaster_id: String,
        broadcaster_name: String,
        title: String,
        description: Option<String>,
        category: Option<String>,
        tags: Vec<String>,
        is_private: bool,
        settings: StreamSettings,
        /// Broadcaster's outbound sink, attached to the session fan-out
        sink: FrameSink,
        respond_to: oneshot::Sender<Result<CreateSessionResult, LiveError>>,
    },

    /// End a session on behalf of `requester_id` (must be the broadcaster).
    EndSession {
        session_id: String,
        requester_id: String,
        respond_to: oneshot::Sender<Result<(), LiveError>>,
    },

    /// Look up a session handle for direct operations.
    Resolve {
        session_id: String,
        respond_to: oneshot::Sender<Result<SessionActorHandle, LiveError>>,
    },

    /// Snapshot one session.
    GetSession {
        session_id: String,
        respond_to: oneshot::Sender<Result<SessionSnapshot, LiveError>>,
    },

    /// Snapshot all live, public sessions (discovery).
    ListSessions {
        respond_to: oneshot::Sender<Vec<SessionSnapshot>>,
    },

    /// Current status for health reporting.
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Begin graceful shutdown: stop accepting sessions, cancel children.
    Shutdown {
        respond_to: oneshot::Sender<Result<(), LiveError>>,
    },
}

/// Messages handled by a `SessionActor`.
pub enum SessionMessage {
    /// Broadcaster's local capture is ready; go live and announce.
    MediaReady {
        respond_to: oneshot::Sender<Result<SessionSnapshot, LiveError>>,
    },

    /// Broadcaster's local capture failed; fail the session.
    MediaFailed { reason: String },

    /// A viewer joins the audience.
    Join {
        viewer_id: String,
        viewer_name: String,
        sink: FrameSink,
        respond_to: oneshot::Sender<Result<JoinAck, LiveError>>,
    },

    /// A viewer leaves (explicit leave or disconnect).
    Leave { viewer_id: String },

    /// Comment from an attached client.
    PublishComment {
        sender_id: String,
        sender_name: String,
        message: String,
        respond_to: oneshot::Sender<Result<(), LiveError>>,
    },

    /// Reaction from an attached client.
    PublishReaction {
        sender_id: String,
        reaction: String,
        x: f64,
        y: f64,
        respond_to: oneshot::Sender<Result<(), LiveError>>,
    },

    /// SDP offer from the broadcaster for one viewer.
    BroadcasterOffer {
        sender_id: String,
        viewer_id: String,
        offer: SessionDescription,
        respond_to: oneshot::Sender<Result<(), LiveError>>,
    },

    /// SDP answer from a viewer.
    ViewerAnswer {
        viewer_id: String,
        answer: SessionDescription,
        respond_to: oneshot::Sender<Result<(), LiveError>>,
    },

    /// ICE candidate from the broadcaster, destined for one viewer.
    BroadcasterCandidate {
        sender_id: String,
        viewer_id: String,
        candidate: IceCandidate,
        respond_to: oneshot::Sender<Result<(), LiveError>>,
    },

    /// ICE candidate from a viewer, destined for the broadcaster.
    ViewerCandidate {
        viewer_id: String,
        candidate: IceCandidate,
        respond_to: oneshot::Sender<Result<(), LiveError>>,
    },

    /// Peer connection state report for one negotiation.
    ConnectionState {
        viewer_id: String,
        state: PeerConnectionState,
    },

    /// Broadcaster changes stream metadata or settings mid-stream.
    UpdateStream {
        requester_id: String,
        title: Option<String>,
        description: Option<String>,
        settings: Option<StreamSettings>,
        respond_to: oneshot::Sender<Result<(), LiveError>>,
    },

    /// Stop the session (broadcaster request or registry force-end).
    Stop {
        requester_id: String,
        respond_to: oneshot::Sender<Result<(), LiveError>>,
    },

    /// Broadcaster's connection dropped; start the grace timer.
    BroadcasterDisconnected,

    /// Broadcaster reconnected within the grace window; reattach its sink.
    BroadcasterResumed {
        sink: FrameSink,
        respond_to: oneshot::Sender<Result<SessionSnapshot, LiveError>>,
    },

    /// Current session snapshot.
    GetState {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },
}
