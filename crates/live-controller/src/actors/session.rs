//! `SessionActor` - per-session actor that owns broadcast state.
//!
//! Each `SessionActor`:
//! - Owns all state for one broadcast (phase, audience, negotiations)
//! - Serializes every operation on the session through its mailbox
//! - Relays offer/answer/ICE per (session, viewer) pair
//! - Publishes events through the session's fan-out channel
//!
//! # Broadcaster Disconnect Handling
//!
//! When the broadcaster's connection drops:
//! 1. The session stays live for a grace period
//! 2. If the broadcaster does not return: session is force-ended
//! 3. Viewers receive the same single ended event as a normal stop

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use signal_protocol::{
    AnswerRelay, CandidateRelay, CommentEvent, ErrorPayload, IceCandidate, OfferFrame,
    PeerConnectionState, ReactionEvent, ServerFrame, SessionDescription, StreamSettings,
    ViewerJoinedPayload,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::messages::{JoinAck, SessionMessage, SessionSnapshot};
use super::metrics::{ActorType, CoordinatorMetrics, MailboxMonitor};
use super::negotiation::{CandidateDisposition, NegotiationContext, NegotiationState, PeerSide};
use crate::errors::LiveError;
use crate::fanout::{ChannelEvent, FanoutChannel, FrameSink};
use crate::lifecycle::{LifecycleEvent, SessionPhase};

/// Default channel buffer size for the session mailbox.
const SESSION_CHANNEL_BUFFER: usize = 256;

/// Timer sweep interval (negotiation timeouts, grace periods, retention).
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Longest accepted comment, in characters.
const MAX_COMMENT_CHARS: usize = 500;

/// Static parameters for a new session.
pub struct SessionParams {
    pub session_id: String,
    pub broadcaster_id: String,
    pub broadcaster_name: String,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub is_private: bool,
    pub settings: StreamSettings,
    /// How long a negotiation may sit without completing
    pub negotiation_timeout: Duration,
    /// How long the session survives a broadcaster disconnect
    pub broadcaster_grace: Duration,
    /// How long a terminal session stays queryable
    pub ended_retention: Duration,
    /// Audience cap
    pub max_viewers: usize,
}

/// Handle to a `SessionActor`.
#[derive(Clone)]
pub struct SessionActorHandle {
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    session_id: String,
    broadcaster_id: String,
}

impl SessionActorHandle {
    /// Get the session ID.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Get the broadcaster's user ID.
    #[must_use]
    pub fn broadcaster_id(&self) -> &str {
        &self.broadcaster_id
    }

    async fn send(&self, message: SessionMessage) -> Result<(), LiveError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| LiveError::Internal(format!("channel send failed: {e}")))
    }

    /// Broadcaster's local capture succeeded; take the session live.
    pub async fn media_ready(&self) -> Result<SessionSnapshot, LiveError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(SessionMessage::MediaReady { respond_to: tx }).await?;
        rx.await
            .map_err(|e| LiveError::Internal(format!("response receive failed: {e}")))?
    }

    /// Broadcaster's local capture failed; fail the session.
    pub async fn media_failed(&self, reason: String) -> Result<(), LiveError> {
        self.send(SessionMessage::MediaFailed { reason }).await
    }

    /// Attach a viewer to the session.
    pub async fn join(
        &self,
        viewer_id: String,
        viewer_name: String,
        sink: FrameSink,
    ) -> Result<JoinAck, LiveError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(SessionMessage::Join {
            viewer_id,
            viewer_name,
            sink,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| LiveError::Internal(format!("response receive failed: {e}")))?
    }

    /// Detach a viewer.
    pub async fn leave(&self, viewer_id: String) -> Result<(), LiveError> {
        self.send(SessionMessage::Leave { viewer_id }).await
    }

    /// Publish a comment from an attached client.
    pub async fn publish_comment(
        &self,
        sender_id: String,
        sender_name: String,
        message: String,
    ) -> Result<(), LiveError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(SessionMessage::PublishComment {
            sender_id,
            sender_name,
            message,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| LiveError::Internal(format!("response receive failed: {e}")))?
    }

    /// Publish a reaction from an attached client.
    pub async fn publish_reaction(
        &self,
        sender_id: String,
        reaction: String,
        x: f64,
        y: f64,
    ) -> Result<(), LiveError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(SessionMessage::PublishReaction {
            sender_id,
            reaction,
            x,
            y,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| LiveError::Internal(format!("response receive failed: {e}")))?
    }

    /// Relay an SDP offer from the broadcaster to one viewer.
    pub async fn broadcaster_offer(
        &self,
        sender_id: String,
        viewer_id: String,
        offer: SessionDescription,
    ) -> Result<(), LiveError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(SessionMessage::BroadcasterOffer {
            sender_id,
            viewer_id,
            offer,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| LiveError::Internal(format!("response receive failed: {e}")))?
    }

    /// Relay an SDP answer from a viewer to the broadcaster.
    pub async fn viewer_answer(
        &self,
        viewer_id: String,
        answer: SessionDescription,
    ) -> Result<(), LiveError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(SessionMessage::ViewerAnswer {
            viewer_id,
            answer,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| LiveError::Internal(format!("response receive failed: {e}")))?
    }

    /// Relay an ICE candidate from the broadcaster to one viewer.
    pub async fn broadcaster_candidate(
        &self,
        sender_id: String,
        viewer_id: String,
        candidate: IceCandidate,
    ) -> Result<(), LiveError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(SessionMessage::BroadcasterCandidate {
            sender_id,
            viewer_id,
            candidate,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| LiveError::Internal(format!("response receive failed: {e}")))?
    }

    /// Relay an ICE candidate from a viewer to the broadcaster.
    pub async fn viewer_candidate(
        &self,
        viewer_id: String,
        candidate: IceCandidate,
    ) -> Result<(), LiveError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(SessionMessage::ViewerCandidate {
            viewer_id,
            candidate,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| LiveError::Internal(format!("response receive failed: {e}")))?
    }

    /// Report a peer connection state change for one negotiation.
    pub async fn connection_state(
        &self,
        viewer_id: String,
        state: PeerConnectionState,
    ) -> Result<(), LiveError> {
        self.send(SessionMessage::ConnectionState { viewer_id, state })
            .await
    }

    /// Change stream metadata or settings mid-stream. Broadcaster only.
    pub async fn update_stream(
        &self,
        requester_id: String,
        title: Option<String>,
        description: Option<String>,
        settings: Option<StreamSettings>,
    ) -> Result<(), LiveError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(SessionMessage::UpdateStream {
            requester_id,
            title,
            description,
            settings,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| LiveError::Internal(format!("response receive failed: {e}")))?
    }

    /// Stop the session. Only the broadcaster may do this.
    pub async fn stop(&self, requester_id: String) -> Result<(), LiveError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(SessionMessage::Stop {
            requester_id,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| LiveError::Internal(format!("response receive failed: {e}")))?
    }

    /// Notify that the broadcaster's connection dropped.
    pub async fn broadcaster_disconnected(&self) -> Result<(), LiveError> {
        self.send(SessionMessage::BroadcasterDisconnected).await
    }

    /// Reattach a reconnecting broadcaster within the grace window.
    pub async fn broadcaster_resumed(
        &self,
        sink: FrameSink,
    ) -> Result<SessionSnapshot, LiveError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(SessionMessage::BroadcasterResumed {
            sink,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| LiveError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get the current session snapshot.
    pub async fn get_state(&self) -> Result<SessionSnapshot, LiveError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(SessionMessage::GetState { respond_to: tx }).await?;
        rx.await
            .map_err(|e| LiveError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the session actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// One attached viewer.
struct Viewer {
    display_name: String,
    negotiation: NegotiationContext,
}

/// The `SessionActor` implementation.
pub struct SessionActor {
    session_id: String,
    broadcaster_id: String,
    broadcaster_name: String,
    title: String,
    description: Option<String>,
    category: Option<String>,
    tags: Vec<String>,
    is_private: bool,
    settings: StreamSettings,
    /// Current lifecycle phase.
    phase: SessionPhase,
    /// Attached viewers by ID (excludes the broadcaster).
    viewers: HashMap<String, Viewer>,
    /// Fan-out to all attached clients (broadcaster + viewers).
    fanout: FanoutChannel,
    /// Milliseconds since epoch.
    started_at: i64,
    ended_at: Option<i64>,
    /// When the broadcaster dropped (grace timer).
    broadcaster_lost_at: Option<Instant>,
    /// When the session reached a terminal phase (retention timer).
    terminal_since: Option<Instant>,
    negotiation_timeout: Duration,
    broadcaster_grace: Duration,
    ended_retention: Duration,
    max_viewers: usize,
    /// Message receiver.
    receiver: mpsc::Receiver<SessionMessage>,
    /// Cancellation token (child of the registry's token).
    cancel_token: CancellationToken,
    /// Shared coordinator metrics.
    metrics: Arc<CoordinatorMetrics>,
    /// Mailbox monitor.
    mailbox: MailboxMonitor,
}

impl SessionActor {
    /// Spawn a new session actor with the broadcaster already attached.
    ///
    /// The session starts in `Starting`; `media_ready` takes it live.
    /// Returns a handle and the task join handle.
    pub fn spawn(
        params: SessionParams,
        broadcaster_sink: FrameSink,
        cancel_token: CancellationToken,
        metrics: Arc<CoordinatorMetrics>,
    ) -> (SessionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);

        let mut fanout = FanoutChannel::new(params.session_id.clone());
        fanout.subscribe(params.broadcaster_id.clone(), broadcaster_sink);

        let mailbox = MailboxMonitor::new(ActorType::Session, &params.session_id);

        let actor = Self {
            session_id: params.session_id.clone(),
            broadcaster_id: params.broadcaster_id.clone(),
            broadcaster_name: params.broadcaster_name,
            title: params.title,
            description: params.description,
            category: params.category,
            tags: params.tags,
            is_private: params.is_private,
            settings: params.settings,
            phase: SessionPhase::Starting,
            viewers: HashMap::new(),
            fanout,
            started_at: chrono::Utc::now().timestamp_millis(),
            ended_at: None,
            broadcaster_lost_at: None,
            terminal_since: None,
            negotiation_timeout: params.negotiation_timeout,
            broadcaster_grace: params.broadcaster_grace,
            ended_retention: params.ended_retention,
            max_viewers: params.max_viewers,
            receiver,
            cancel_token: cancel_token.clone(),
            metrics,
            mailbox,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionActorHandle {
            sender,
            cancel_token,
            session_id: params.session_id,
            broadcaster_id: params.broadcaster_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "lc.actor.session", fields(session_id = %self.session_id))]
    async fn run(mut self) {
        info!(
            target: "lc.actor.session",
            session_id = %self.session_id,
            broadcaster_id = %self.broadcaster_id,
            "SessionActor started"
        );

        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);

        loop {
            tokio::select! {
                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "lc.actor.session",
                        session_id = %self.session_id,
                        "SessionActor received cancellation signal"
                    );
                    self.graceful_shutdown();
                    break;
                }

                // Timer sweep: negotiation timeouts, grace period, retention
                _ = sweep.tick() => {
                    if self.check_timers() {
                        break;
                    }
                }

                // Handle messages
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "lc.actor.session",
                                session_id = %self.session_id,
                                "SessionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "lc.actor.session",
            session_id = %self.session_id,
            phase = self.phase.as_str(),
            messages_processed = self.mailbox.messages_processed(),
            "SessionActor stopped"
        );
    }

    /// Handle a single message.
    fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::MediaReady { respond_to } => {
                let result = self.handle_media_ready();
                let _ = respond_to.send(result);
            }

            SessionMessage::MediaFailed { reason } => {
                self.handle_media_failed(&reason);
            }

            SessionMessage::Join {
                viewer_id,
                viewer_name,
                sink,
                respond_to,
            } => {
                let result = self.handle_join(viewer_id, viewer_name, sink);
                let _ = respond_to.send(result);
            }

            SessionMessage::Leave { viewer_id } => {
                self.handle_leave(&viewer_id);
            }

            SessionMessage::PublishComment {
                sender_id,
                sender_name,
                message,
                respond_to,
            } => {
                let result = self.handle_comment(&sender_id, &sender_name, message);
                let _ = respond_to.send(result);
            }

            SessionMessage::PublishReaction {
                sender_id,
                reaction,
                x,
                y,
                respond_to,
            } => {
                let result = self.handle_reaction(&sender_id, reaction, x, y);
                let _ = respond_to.send(result);
            }

            SessionMessage::BroadcasterOffer {
                sender_id,
                viewer_id,
                offer,
                respond_to,
            } => {
                let result = self.handle_broadcaster_offer(&sender_id, &viewer_id, offer);
                let _ = respond_to.send(result);
            }

            SessionMessage::ViewerAnswer {
                viewer_id,
                answer,
                respond_to,
            } => {
                let result = self.handle_viewer_answer(&viewer_id, answer);
                let _ = respond_to.send(result);
            }

            SessionMessage::BroadcasterCandidate {
                sender_id,
                viewer_id,
                candidate,
                respond_to,
            } => {
                let result = self.handle_broadcaster_candidate(&sender_id, &viewer_id, candidate);
                let _ = respond_to.send(result);
            }

            SessionMessage::ViewerCandidate {
                viewer_id,
                candidate,
                respond_to,
            } => {
                let result = self.handle_viewer_candidate(&viewer_id, candidate);
                let _ = respond_to.send(result);
            }

            SessionMessage::ConnectionState { viewer_id, state } => {
                self.handle_connection_state(&viewer_id, state);
            }

            SessionMessage::UpdateStream {
                requester_id,
                title,
                description,
                settings,
                respond_to,
            } => {
                let result = self.handle_update_stream(&requester_id, title, description, settings);
                let _ = respond_to.send(result);
            }

            SessionMessage::Stop {
                requester_id,
                respond_to,
            } => {
                let result = self.handle_stop(&requester_id);
                let _ = respond_to.send(result);
            }

            SessionMessage::BroadcasterDisconnected => {
                self.handle_broadcaster_disconnected();
            }

            SessionMessage::BroadcasterResumed { sink, respond_to } => {
                let result = self.handle_broadcaster_resumed(sink);
                let _ = respond_to.send(result);
            }

            SessionMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
    }

    /// Take the session live and announce it.
    fn handle_media_ready(&mut self) -> Result<SessionSnapshot, LiveError> {
        self.phase = self.phase.transition(LifecycleEvent::MediaReady)?;

        let snapshot = self.snapshot();
        self.fanout
            .publish(&ChannelEvent::Started(snapshot.to_meta()), None);

        info!(
            target: "lc.actor.session",
            session_id = %self.session_id,
            title = %self.title,
            "Session is live"
        );

        Ok(snapshot)
    }

    /// Fail the session before it went live.
    fn handle_media_failed(&mut self, reason: &str) {
        match self.phase.transition(LifecycleEvent::MediaFailed) {
            Ok(next) => {
                warn!(
                    target: "lc.actor.session",
                    session_id = %self.session_id,
                    reason = %reason,
                    "Media acquisition failed, session failed"
                );
                self.phase = next;
                self.ended_at = Some(chrono::Utc::now().timestamp_millis());
                self.terminal_since = Some(Instant::now());
            }
            Err(_) => {
                warn!(
                    target: "lc.actor.session",
                    session_id = %self.session_id,
                    phase = self.phase.as_str(),
                    "Ignoring media failure outside Starting"
                );
            }
        }
    }

    /// Handle a viewer joining the audience.
    #[instrument(skip_all, fields(session_id = %self.session_id))]
    fn handle_join(
        &mut self,
        viewer_id: String,
        viewer_name: String,
        sink: FrameSink,
    ) -> Result<JoinAck, LiveError> {
        // A session that is not live is invisible to joiners, whether it
        // has not started yet or has already ended.
        if !self.phase.accepts_viewers() {
            return Err(LiveError::NotFound(self.session_id.clone()));
        }
        if viewer_id == self.broadcaster_id {
            return Err(LiveError::InvalidRequest(
                "Broadcaster cannot join as viewer".to_string(),
            ));
        }

        // A rejoin supersedes the previous attachment (reconnect case)
        if let Some(mut previous) = self.viewers.remove(&viewer_id) {
            previous.negotiation.close();
            self.fanout.unsubscribe(&viewer_id);
            self.metrics.viewer_left();
            debug!(
                target: "lc.actor.session",
                viewer_id = %viewer_id,
                "Viewer rejoined, replacing previous attachment"
            );
        }

        if self.viewers.len() >= self.max_viewers {
            return Err(LiveError::CapacityExceeded(format!(
                "session {} is full",
                self.session_id
            )));
        }

        self.viewers.insert(
            viewer_id.clone(),
            Viewer {
                display_name: viewer_name.clone(),
                negotiation: NegotiationContext::new(viewer_id.clone(), self.negotiation_timeout),
            },
        );
        self.fanout.subscribe(viewer_id.clone(), sink);
        self.metrics.viewer_joined();

        let count = self.viewers.len();
        self.fanout
            .publish(&ChannelEvent::ViewerCount { count }, None);

        // Prompt the broadcaster to open a peer connection for this viewer
        self.fanout.send_to(
            &self.broadcaster_id,
            ServerFrame::ViewerJoined(ViewerJoinedPayload {
                stream_id: self.session_id.clone(),
                viewer_id: viewer_id.clone(),
                viewer_name,
            }),
        );

        info!(
            target: "lc.actor.session",
            viewer_id = %viewer_id,
            viewer_count = count,
            "Viewer joined"
        );

        Ok(JoinAck {
            meta: self.snapshot().to_meta(),
            viewer_count: count,
        })
    }

    /// Handle a viewer leaving.
    fn handle_leave(&mut self, viewer_id: &str) {
        if let Some(mut viewer) = self.viewers.remove(viewer_id) {
            viewer.negotiation.close();
            self.fanout.unsubscribe(viewer_id);
            self.metrics.viewer_left();

            let count = self.viewers.len();
            self.fanout
                .publish(&ChannelEvent::ViewerCount { count }, None);

            info!(
                target: "lc.actor.session",
                session_id = %self.session_id,
                viewer_id = %viewer_id,
                viewer_name = %viewer.display_name,
                viewer_count = count,
                "Viewer left"
            );
        } else {
            debug!(
                target: "lc.actor.session",
                session_id = %self.session_id,
                viewer_id = %viewer_id,
                "Leave from unattached viewer ignored"
            );
        }
    }

    /// Publish a comment to the whole audience.
    fn handle_comment(
        &mut self,
        sender_id: &str,
        sender_name: &str,
        message: String,
    ) -> Result<(), LiveError> {
        if self.phase != SessionPhase::Live {
            return Err(LiveError::SessionNotLive(self.session_id.clone()));
        }
        if !self.settings.allow_comments {
            return Err(LiveError::Forbidden(
                "Comments are disabled for this stream".to_string(),
            ));
        }
        if !self.is_attached(sender_id) {
            return Err(LiveError::Forbidden(
                "Only attached clients can comment".to_string(),
            ));
        }
        if message.trim().is_empty() || message.chars().count() > MAX_COMMENT_CHARS {
            return Err(LiveError::InvalidRequest("Invalid comment length".to_string()));
        }

        let event = CommentEvent {
            id: uuid::Uuid::new_v4().to_string(),
            stream_id: self.session_id.clone(),
            user_id: sender_id.to_string(),
            username: sender_name.to_string(),
            message,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };

        // The sender receives the echo too: the server-assigned id and
        // timestamp make it the canonical copy.
        self.fanout.publish(&ChannelEvent::Comment(event), None);
        Ok(())
    }

    /// Publish a reaction to the whole audience.
    fn handle_reaction(
        &mut self,
        sender_id: &str,
        reaction: String,
        x: f64,
        y: f64,
    ) -> Result<(), LiveError> {
        if self.phase != SessionPhase::Live {
            return Err(LiveError::SessionNotLive(self.session_id.clone()));
        }
        if !self.settings.allow_reactions {
            return Err(LiveError::Forbidden(
                "Reactions are disabled for this stream".to_string(),
            ));
        }
        if !self.is_attached(sender_id) {
            return Err(LiveError::Forbidden(
                "Only attached clients can react".to_string(),
            ));
        }

        let event = ReactionEvent {
            id: uuid::Uuid::new_v4().to_string(),
            stream_id: self.session_id.clone(),
            user_id: sender_id.to_string(),
            reaction,
            x,
            y,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };

        self.fanout.publish(&ChannelEvent::Reaction(event), None);
        Ok(())
    }

    /// Relay the broadcaster's offer to one viewer and drain any candidates
    /// that were waiting on it.
    fn handle_broadcaster_offer(
        &mut self,
        sender_id: &str,
        viewer_id: &str,
        offer: SessionDescription,
    ) -> Result<(), LiveError> {
        if sender_id != self.broadcaster_id {
            return Err(LiveError::Unauthorized(
                "Only the broadcaster can send offers".to_string(),
            ));
        }

        let viewer = self.viewers.get_mut(viewer_id).ok_or_else(|| {
            LiveError::Negotiation(format!("no negotiation with viewer {viewer_id}"))
        })?;

        let drained = viewer.negotiation.commit_remote_description(PeerSide::Viewer)?;

        self.fanout.send_to(
            viewer_id,
            ServerFrame::WebrtcOffer(OfferFrame {
                stream_id: self.session_id.clone(),
                viewer_id: viewer_id.to_string(),
                offer,
            }),
        );
        for candidate in drained {
            self.relay_candidate_to(viewer_id, viewer_id, candidate);
        }

        debug!(
            target: "lc.actor.session",
            session_id = %self.session_id,
            viewer_id = %viewer_id,
            "Offer relayed to viewer"
        );
        Ok(())
    }

    /// Relay a viewer's answer back to the broadcaster.
    fn handle_viewer_answer(
        &mut self,
        viewer_id: &str,
        answer: SessionDescription,
    ) -> Result<(), LiveError> {
        let viewer = self.viewers.get_mut(viewer_id).ok_or_else(|| {
            LiveError::Negotiation(format!("no negotiation with viewer {viewer_id}"))
        })?;

        let drained = viewer
            .negotiation
            .commit_remote_description(PeerSide::Broadcaster)?;

        let broadcaster_id = self.broadcaster_id.clone();
        self.fanout.send_to(
            &broadcaster_id,
            ServerFrame::WebrtcAnswer(AnswerRelay {
                stream_id: self.session_id.clone(),
                viewer_id: viewer_id.to_string(),
                answer,
            }),
        );
        for candidate in drained {
            self.relay_candidate_to(&broadcaster_id, viewer_id, candidate);
        }

        debug!(
            target: "lc.actor.session",
            session_id = %self.session_id,
            viewer_id = %viewer_id,
            "Answer relayed to broadcaster"
        );
        Ok(())
    }

    /// ICE candidate from the broadcaster, destined for one viewer.
    fn handle_broadcaster_candidate(
        &mut self,
        sender_id: &str,
        viewer_id: &str,
        candidate: IceCandidate,
    ) -> Result<(), LiveError> {
        if sender_id != self.broadcaster_id {
            return Err(LiveError::Unauthorized(
                "Only the broadcaster can target viewers".to_string(),
            ));
        }

        let viewer = self.viewers.get_mut(viewer_id).ok_or_else(|| {
            LiveError::Negotiation(format!("no negotiation with viewer {viewer_id}"))
        })?;

        match viewer
            .negotiation
            .add_remote_candidate(PeerSide::Viewer, candidate.clone())?
        {
            CandidateDisposition::Forward => {
                self.relay_candidate_to(viewer_id, viewer_id, candidate);
            }
            CandidateDisposition::Buffered => {}
        }
        Ok(())
    }

    /// ICE candidate from a viewer, destined for the broadcaster.
    fn handle_viewer_candidate(
        &mut self,
        viewer_id: &str,
        candidate: IceCandidate,
    ) -> Result<(), LiveError> {
        let viewer = self.viewers.get_mut(viewer_id).ok_or_else(|| {
            LiveError::Negotiation(format!("no negotiation with viewer {viewer_id}"))
        })?;

        match viewer
            .negotiation
            .add_remote_candidate(PeerSide::Broadcaster, candidate.clone())?
        {
            CandidateDisposition::Forward => {
                let broadcaster_id = self.broadcaster_id.clone();
                self.relay_candidate_to(&broadcaster_id, viewer_id, candidate);
            }
            CandidateDisposition::Buffered => {}
        }
        Ok(())
    }

    fn relay_candidate_to(&mut self, recipient: &str, viewer_id: &str, candidate: IceCandidate) {
        self.fanout.send_to(
            recipient,
            ServerFrame::WebrtcIceCandidate(CandidateRelay {
                stream_id: self.session_id.clone(),
                viewer_id: viewer_id.to_string(),
                candidate,
            }),
        );
    }

    /// Fold a peer connection state report into the negotiation.
    fn handle_connection_state(&mut self, viewer_id: &str, state: PeerConnectionState) {
        let Some(viewer) = self.viewers.get_mut(viewer_id) else {
            debug!(
                target: "lc.actor.session",
                session_id = %self.session_id,
                viewer_id = %viewer_id,
                "Connection state for unknown negotiation ignored"
            );
            return;
        };

        let new_state = viewer.negotiation.connection_state_changed(state);
        match new_state {
            NegotiationState::Connected => {
                info!(
                    target: "lc.actor.session",
                    session_id = %self.session_id,
                    viewer_id = %viewer_id,
                    "Peer connection established"
                );
            }
            NegotiationState::Failed => {
                warn!(
                    target: "lc.actor.session",
                    session_id = %self.session_id,
                    viewer_id = %viewer_id,
                    reported = ?state,
                    "Peer connection failed"
                );
                self.fail_negotiation(
                    viewer_id,
                    &LiveError::Negotiation(format!(
                        "Peer connection with viewer {viewer_id} failed"
                    )),
                );
            }
            _ => {}
        }
    }

    /// Tear down a failed negotiation: report the failure to both parties,
    /// detach the viewer, and publish the new audience count.
    fn fail_negotiation(&mut self, viewer_id: &str, error: &LiveError) {
        let Some(mut viewer) = self.viewers.remove(viewer_id) else {
            return;
        };
        viewer.negotiation.fail();

        self.fanout.send_to(
            viewer_id,
            ServerFrame::Error(ErrorPayload {
                code: error.wire_code().to_string(),
                message: error.client_message(),
                stream_id: Some(self.session_id.clone()),
            }),
        );
        self.fanout.unsubscribe(viewer_id);
        self.metrics.viewer_left();

        let broadcaster_error =
            LiveError::Negotiation(format!("Negotiation with viewer {viewer_id} failed"));
        let broadcaster_id = self.broadcaster_id.clone();
        self.fanout.send_to(
            &broadcaster_id,
            ServerFrame::Error(ErrorPayload {
                code: broadcaster_error.wire_code().to_string(),
                message: broadcaster_error.client_message(),
                stream_id: Some(self.session_id.clone()),
            }),
        );

        let count = self.viewers.len();
        self.fanout
            .publish(&ChannelEvent::ViewerCount { count }, None);
    }

    /// Apply mid-stream metadata or settings changes and announce them.
    fn handle_update_stream(
        &mut self,
        requester_id: &str,
        title: Option<String>,
        description: Option<String>,
        settings: Option<StreamSettings>,
    ) -> Result<(), LiveError> {
        if requester_id != self.broadcaster_id {
            return Err(LiveError::Unauthorized(
                "Only the broadcaster can update the stream".to_string(),
            ));
        }
        if self.phase != SessionPhase::Live {
            return Err(LiveError::SessionNotLive(self.session_id.clone()));
        }
        if let Some(title) = title {
            if title.trim().is_empty() {
                return Err(LiveError::InvalidRequest(
                    "Title cannot be empty".to_string(),
                ));
            }
            self.title = title;
        }
        if let Some(description) = description {
            self.description = Some(description);
        }
        if let Some(settings) = settings {
            self.settings = settings;
        }

        let meta = self.snapshot().to_meta();
        self.fanout.publish(&ChannelEvent::Updated(meta), None);

        info!(
            target: "lc.actor.session",
            session_id = %self.session_id,
            title = %self.title,
            "Stream updated"
        );
        Ok(())
    }

    /// Stop the session and publish the single ended event.
    fn handle_stop(&mut self, requester_id: &str) -> Result<(), LiveError> {
        if requester_id != self.broadcaster_id {
            return Err(LiveError::Unauthorized(
                "Only the broadcaster can stop the stream".to_string(),
            ));
        }

        self.phase = self.phase.transition(LifecycleEvent::Stop)?;
        self.finalize_end();

        info!(
            target: "lc.actor.session",
            session_id = %self.session_id,
            "Session stopped"
        );
        Ok(())
    }

    /// Broadcaster connection dropped.
    fn handle_broadcaster_disconnected(&mut self) {
        match self.phase {
            SessionPhase::Starting => {
                // Never went live; there is no audience to notify
                self.handle_media_failed("broadcaster disconnected during start");
            }
            SessionPhase::Live => {
                self.broadcaster_lost_at = Some(Instant::now());
                self.fanout.unsubscribe(&self.broadcaster_id);
                info!(
                    target: "lc.actor.session",
                    session_id = %self.session_id,
                    grace_seconds = self.broadcaster_grace.as_secs(),
                    "Broadcaster disconnected, grace period started"
                );
            }
            _ => {
                debug!(
                    target: "lc.actor.session",
                    session_id = %self.session_id,
                    phase = self.phase.as_str(),
                    "Broadcaster disconnect ignored in terminal phase"
                );
            }
        }
    }

    /// Broadcaster reconnected within the grace window; reattach its sink
    /// and clear the grace timer.
    fn handle_broadcaster_resumed(
        &mut self,
        sink: FrameSink,
    ) -> Result<SessionSnapshot, LiveError> {
        if self.phase != SessionPhase::Live {
            return Err(LiveError::SessionNotLive(self.session_id.clone()));
        }
        if self.broadcaster_lost_at.is_none() {
            return Err(LiveError::SessionConflict(format!(
                "broadcaster {} is still attached to session {}",
                self.broadcaster_id, self.session_id
            )));
        }

        self.broadcaster_lost_at = None;
        self.fanout.subscribe(self.broadcaster_id.clone(), sink);

        info!(
            target: "lc.actor.session",
            session_id = %self.session_id,
            broadcaster_id = %self.broadcaster_id,
            "Broadcaster resumed within grace period"
        );
        Ok(self.snapshot())
    }

    /// Deliver the final ended event, tear down negotiations, seal the record.
    fn finalize_end(&mut self) {
        let ended_at = chrono::Utc::now().timestamp_millis();
        self.ended_at = Some(ended_at);

        self.fanout.publish(&ChannelEvent::Ended { ended_at }, None);

        for (_, viewer) in self.viewers.iter_mut() {
            viewer.negotiation.close();
        }
        for _ in 0..self.viewers.len() {
            self.metrics.viewer_left();
        }
        self.viewers.clear();
        self.fanout.clear();

        if let Ok(next) = self.phase.transition(LifecycleEvent::Finalize) {
            self.phase = next;
        }
        self.terminal_since = Some(Instant::now());
    }

    /// Periodic timer sweep. Returns true when the actor should exit
    /// (terminal retention elapsed).
    fn check_timers(&mut self) -> bool {
        let now = Instant::now();

        // Negotiation timeouts
        let expired: Vec<String> = self
            .viewers
            .iter()
            .filter(|(_, v)| v.negotiation.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();
        for viewer_id in expired {
            warn!(
                target: "lc.actor.session",
                session_id = %self.session_id,
                viewer_id = %viewer_id,
                "Negotiation timed out"
            );
            self.fail_negotiation(
                &viewer_id,
                &LiveError::Timeout("negotiation did not complete".to_string()),
            );
        }

        // Broadcaster grace period
        if let Some(lost_at) = self.broadcaster_lost_at {
            if self.phase == SessionPhase::Live
                && now.duration_since(lost_at) >= self.broadcaster_grace
            {
                info!(
                    target: "lc.actor.session",
                    session_id = %self.session_id,
                    "Broadcaster grace period expired, force-ending session"
                );
                if let Ok(next) = self.phase.transition(LifecycleEvent::Stop) {
                    self.phase = next;
                    self.finalize_end();
                }
                self.broadcaster_lost_at = None;
            }
        }

        // Terminal retention
        if let Some(since) = self.terminal_since {
            if now.duration_since(since) >= self.ended_retention {
                info!(
                    target: "lc.actor.session",
                    session_id = %self.session_id,
                    "Retention elapsed, session record collected"
                );
                return true;
            }
        }

        false
    }

    fn is_attached(&self, client_id: &str) -> bool {
        client_id == self.broadcaster_id || self.viewers.contains_key(client_id)
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            broadcaster_id: self.broadcaster_id.clone(),
            broadcaster_name: self.broadcaster_name.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            category: self.category.clone(),
            tags: self.tags.clone(),
            is_private: self.is_private,
            settings: self.settings,
            phase: self.phase,
            viewer_count: self.viewers.len(),
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }

    /// Perform graceful shutdown: end the session if it is still running.
    fn graceful_shutdown(&mut self) {
        if !self.phase.is_terminal() {
            if let Ok(next) = self.phase.transition(LifecycleEvent::Stop) {
                self.phase = next;
                self.finalize_end();
            }
        }
        info!(
            target: "lc.actor.session",
            session_id = %self.session_id,
            "Graceful shutdown complete"
        );
    }
}
