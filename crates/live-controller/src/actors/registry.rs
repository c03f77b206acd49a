//! `RegistryActor` - singleton actor that owns the session table.
//!
//! The registry:
//! - Creates and supervises one `SessionActor` per broadcast
//! - Enforces the one-live-session-per-broadcaster rule
//! - Answers discovery queries (live public sessions)
//! - Reaps finished session tasks and detects panics
//! - Coordinates graceful shutdown of all sessions

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use signal_protocol::StreamSettings;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::messages::{
    CreateSessionResult, RegistryMessage, RegistryStatus, SessionSnapshot,
};
use super::metrics::{ActorType, CoordinatorMetrics, MailboxMonitor};
use super::session::{SessionActor, SessionActorHandle, SessionParams};
use crate::config::Config;
use crate::errors::LiveError;
use crate::fanout::FrameSink;
use crate::lifecycle::SessionPhase;

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 512;

/// Session task health check interval.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Per-session drain timeout during graceful shutdown.
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the registry needs to open a session.
pub struct NewSessionRequest {
    pub broadcaster_id: String,
    pub broadcaster_name: String,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub is_private: bool,
    pub settings: StreamSettings,
    /// Broadcaster's outbound sink, attached to the session fan-out
    pub sink: FrameSink,
}

/// Handle to the `RegistryActor`.
#[derive(Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl RegistryHandle {
    /// Spawn the registry actor. Returns a handle and the task join handle.
    #[must_use]
    pub fn new(config: &Config, metrics: Arc<CoordinatorMetrics>) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RegistryActor {
            sessions: HashMap::new(),
            broadcaster_index: HashMap::new(),
            accepting_new: true,
            max_sessions: config.max_sessions as usize,
            max_viewers_per_session: config.max_viewers_per_session as usize,
            negotiation_timeout: Duration::from_secs(config.negotiation_timeout_seconds),
            broadcaster_grace: Duration::from_secs(config.broadcaster_grace_seconds),
            ended_retention: Duration::from_secs(config.ended_retention_seconds),
            receiver,
            cancel_token: cancel_token.clone(),
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Registry, "registry"),
        };

        let task_handle = tokio::spawn(actor.run());

        (
            Self {
                sender,
                cancel_token,
            },
            task_handle,
        )
    }

    async fn send(&self, message: RegistryMessage) -> Result<(), LiveError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| LiveError::Internal(format!("channel send failed: {e}")))
    }

    /// Open a new session.
    pub async fn create_session(
        &self,
        request: NewSessionRequest,
    ) -> Result<CreateSessionResult, LiveError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(RegistryMessage::CreateSession {
            broadcaster_id: request.broadcaster_id,
            broadcaster_name: request.broadcaster_name,
            title: request.title,
            description: request.description,
            category: request.category,
            tags: request.tags,
            is_private: request.is_private,
            settings: request.settings,
            sink: request.sink,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| LiveError::Internal(format!("response receive failed: {e}")))?
    }

    /// End a session on behalf of a requester.
    pub async fn end_session(
        &self,
        session_id: String,
        requester_id: String,
    ) -> Result<(), LiveError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(RegistryMessage::EndSession {
            session_id,
            requester_id,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| LiveError::Internal(format!("response receive failed: {e}")))?
    }

    /// Look up a session handle.
    pub async fn resolve(&self, session_id: String) -> Result<SessionActorHandle, LiveError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(RegistryMessage::Resolve {
            session_id,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| LiveError::Internal(format!("response receive failed: {e}")))?
    }

    /// Snapshot one session.
    pub async fn get_session(&self, session_id: String) -> Result<SessionSnapshot, LiveError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(RegistryMessage::GetSession {
            session_id,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| LiveError::Internal(format!("response receive failed: {e}")))?
    }

    /// Snapshot all live, public sessions.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSnapshot>, LiveError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(RegistryMessage::ListSessions { respond_to: tx })
            .await?;
        rx.await
            .map_err(|e| LiveError::Internal(format!("response receive failed: {e}")))
    }

    /// Current registry status.
    pub async fn get_status(&self) -> Result<RegistryStatus, LiveError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(RegistryMessage::GetStatus { respond_to: tx })
            .await?;
        rx.await
            .map_err(|e| LiveError::Internal(format!("response receive failed: {e}")))
    }

    /// Begin graceful shutdown: stop accepting sessions, end the rest.
    pub async fn shutdown(&self) -> Result<(), LiveError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(RegistryMessage::Shutdown { respond_to: tx })
            .await?;
        rx.await
            .map_err(|e| LiveError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the registry and all sessions.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Derive a token that fires when the registry shuts down.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    /// Check if the registry is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// One supervised session.
struct ManagedSession {
    handle: SessionActorHandle,
    task_handle: JoinHandle<()>,
    broadcaster_id: String,
    created_at: Instant,
}

/// The `RegistryActor` implementation.
struct RegistryActor {
    /// Supervised sessions by ID.
    sessions: HashMap<String, ManagedSession>,
    /// Broadcaster ID to session ID.
    broadcaster_index: HashMap<String, String>,
    /// False once shutdown has begun.
    accepting_new: bool,
    max_sessions: usize,
    max_viewers_per_session: usize,
    negotiation_timeout: Duration,
    broadcaster_grace: Duration,
    ended_retention: Duration,
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Root token; sessions run on child tokens.
    cancel_token: CancellationToken,
    metrics: Arc<CoordinatorMetrics>,
    mailbox: MailboxMonitor,
}

impl RegistryActor {
    /// Run the actor message loop.
    #[instrument(skip_all, name = "lc.actor.registry")]
    async fn run(mut self) {
        info!(
            target: "lc.actor.registry",
            max_sessions = self.max_sessions,
            "RegistryActor started"
        );

        let mut health_check = tokio::time::interval(HEALTH_CHECK_INTERVAL);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "lc.actor.registry",
                        "RegistryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                _ = health_check.tick() => {
                    self.check_session_health().await;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            let shutdown = self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                            if shutdown {
                                break;
                            }
                        }
                        None => {
                            info!(
                                target: "lc.actor.registry",
                                "RegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "lc.actor.registry",
            messages_processed = self.mailbox.messages_processed(),
            "RegistryActor stopped"
        );
    }

    /// Handle a single message. Returns true when the loop should exit.
    async fn handle_message(&mut self, message: RegistryMessage) -> bool {
        match message {
            RegistryMessage::CreateSession {
                broadcaster_id,
                broadcaster_name,
                title,
                description,
                category,
                tags,
                is_private,
                settings,
                sink,
                respond_to,
            } => {
                let result = self
                    .handle_create_session(
                        broadcaster_id,
                        broadcaster_name,
                        title,
                        description,
                        category,
                        tags,
                        is_private,
                        settings,
                        sink,
                    )
                    .await;
                let _ = respond_to.send(result);
                false
            }

            RegistryMessage::EndSession {
                session_id,
                requester_id,
                respond_to,
            } => {
                let result = self.handle_end_session(&session_id, requester_id).await;
                let _ = respond_to.send(result);
                false
            }

            RegistryMessage::Resolve {
                session_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_resolve(&session_id));
                false
            }

            RegistryMessage::GetSession {
                session_id,
                respond_to,
            } => {
                let result = self.handle_get_session(&session_id).await;
                let _ = respond_to.send(result);
                false
            }

            RegistryMessage::ListSessions { respond_to } => {
                let _ = respond_to.send(self.handle_list_sessions().await);
                false
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(RegistryStatus {
                    session_count: self.sessions.len(),
                    is_draining: !self.accepting_new,
                    mailbox_depth: self.mailbox.current_depth(),
                });
                false
            }

            RegistryMessage::Shutdown { respond_to } => {
                self.accepting_new = false;
                self.graceful_shutdown().await;
                let _ = respond_to.send(Ok(()));
                true
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, fields(broadcaster_id = %broadcaster_id))]
    async fn handle_create_session(
        &mut self,
        broadcaster_id: String,
        broadcaster_name: String,
        title: String,
        description: Option<String>,
        category: Option<String>,
        tags: Vec<String>,
        is_private: bool,
        settings: StreamSettings,
        sink: FrameSink,
    ) -> Result<CreateSessionResult, LiveError> {
        if !self.accepting_new {
            return Err(LiveError::Draining);
        }
        if title.trim().is_empty() {
            return Err(LiveError::InvalidRequest(
                "Stream title must not be empty".to_string(),
            ));
        }

        // One live session per broadcaster. A terminal leftover (retention
        // window) is evicted so the broadcaster can go live again. An active
        // session whose broadcaster dropped within the grace window is
        // resumed instead of conflicting.
        if let Some(existing_id) = self.broadcaster_index.get(&broadcaster_id).cloned() {
            if self.session_is_active(&existing_id).await {
                let handle = self
                    .sessions
                    .get(&existing_id)
                    .map(|m| m.handle.clone())
                    .ok_or_else(|| LiveError::NotFound(existing_id.clone()))?;
                return match handle.broadcaster_resumed(sink).await {
                    Ok(snapshot) => {
                        info!(
                            target: "lc.actor.registry",
                            session_id = %existing_id,
                            broadcaster_id = %broadcaster_id,
                            "Broadcaster resumed existing session"
                        );
                        Ok(CreateSessionResult {
                            handle,
                            snapshot,
                            resumed: true,
                        })
                    }
                    Err(_) => Err(LiveError::SessionConflict(format!(
                        "broadcaster {broadcaster_id} already hosts session {existing_id}"
                    ))),
                };
            }
            self.evict_session(&existing_id);
        }

        if self.sessions.len() >= self.max_sessions {
            return Err(LiveError::CapacityExceeded(format!(
                "session limit {} reached",
                self.max_sessions
            )));
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let params = SessionParams {
            session_id: session_id.clone(),
            broadcaster_id: broadcaster_id.clone(),
            broadcaster_name,
            title,
            description,
            category,
            tags,
            is_private,
            settings,
            negotiation_timeout: self.negotiation_timeout,
            broadcaster_grace: self.broadcaster_grace,
            ended_retention: self.ended_retention,
            max_viewers: self.max_viewers_per_session,
        };

        let (handle, task_handle) = SessionActor::spawn(
            params,
            sink,
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        let snapshot = handle.get_state().await?;

        self.sessions.insert(
            session_id.clone(),
            ManagedSession {
                handle: handle.clone(),
                task_handle,
                broadcaster_id: broadcaster_id.clone(),
                created_at: Instant::now(),
            },
        );
        self.broadcaster_index
            .insert(broadcaster_id, session_id.clone());
        self.metrics.session_created();

        info!(
            target: "lc.actor.registry",
            session_id = %session_id,
            session_count = self.sessions.len(),
            "Session created"
        );

        Ok(CreateSessionResult {
            handle,
            snapshot,
            resumed: false,
        })
    }

    async fn handle_end_session(
        &mut self,
        session_id: &str,
        requester_id: String,
    ) -> Result<(), LiveError> {
        let managed = self
            .sessions
            .get(session_id)
            .ok_or_else(|| LiveError::NotFound(session_id.to_string()))?;

        managed.handle.stop(requester_id).await
    }

    fn handle_resolve(&self, session_id: &str) -> Result<SessionActorHandle, LiveError> {
        self.sessions
            .get(session_id)
            .map(|m| m.handle.clone())
            .ok_or_else(|| LiveError::NotFound(session_id.to_string()))
    }

    async fn handle_get_session(&self, session_id: &str) -> Result<SessionSnapshot, LiveError> {
        let managed = self
            .sessions
            .get(session_id)
            .ok_or_else(|| LiveError::NotFound(session_id.to_string()))?;

        // A session whose actor already exited counts as gone even if the
        // health check has not reaped it yet.
        managed
            .handle
            .get_state()
            .await
            .map_err(|_| LiveError::NotFound(session_id.to_string()))
    }

    /// Snapshot all live, public sessions for discovery.
    async fn handle_list_sessions(&self) -> Vec<SessionSnapshot> {
        let mut snapshots = Vec::new();
        for managed in self.sessions.values() {
            match managed.handle.get_state().await {
                Ok(snapshot) => {
                    if snapshot.phase == SessionPhase::Live && !snapshot.is_private {
                        snapshots.push(snapshot);
                    }
                }
                Err(e) => {
                    debug!(
                        target: "lc.actor.registry",
                        session_id = %managed.handle.session_id(),
                        error = %e,
                        "Skipping unreachable session in listing"
                    );
                }
            }
        }
        snapshots
    }

    /// True when the session actor is reachable and not in a terminal phase.
    async fn session_is_active(&self, session_id: &str) -> bool {
        let Some(managed) = self.sessions.get(session_id) else {
            return false;
        };
        if managed.task_handle.is_finished() {
            return false;
        }
        match managed.handle.get_state().await {
            Ok(snapshot) => !snapshot.phase.is_terminal(),
            Err(_) => false,
        }
    }

    /// Remove a session entry (actor cancelled, indexes cleaned).
    fn evict_session(&mut self, session_id: &str) {
        if let Some(managed) = self.sessions.remove(session_id) {
            managed.handle.cancel();
            self.broadcaster_index.remove(&managed.broadcaster_id);
            self.metrics.session_removed();
            debug!(
                target: "lc.actor.registry",
                session_id = %session_id,
                uptime_secs = managed.created_at.elapsed().as_secs(),
                "Session evicted"
            );
        }
    }

    /// Reap sessions whose tasks have finished; detect panics.
    async fn check_session_health(&mut self) {
        let finished: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, m)| m.task_handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();

        for session_id in finished {
            if let Some(managed) = self.sessions.remove(&session_id) {
                self.broadcaster_index.remove(&managed.broadcaster_id);
                self.metrics.session_removed();

                match managed.task_handle.await {
                    Ok(()) => {
                        info!(
                            target: "lc.actor.registry",
                            session_id = %session_id,
                            "Session task finished, entry reaped"
                        );
                    }
                    Err(e) if e.is_panic() => {
                        error!(
                            target: "lc.actor.registry",
                            session_id = %session_id,
                            "Session actor panicked"
                        );
                        self.metrics.record_panic(ActorType::Session);
                    }
                    Err(e) => {
                        warn!(
                            target: "lc.actor.registry",
                            session_id = %session_id,
                            error = %e,
                            "Session task aborted"
                        );
                    }
                }
            }
        }
    }

    /// Cancel all sessions and wait for each to drain.
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "lc.actor.registry",
            session_count = self.sessions.len(),
            "Registry graceful shutdown: draining sessions"
        );

        for (session_id, managed) in self.sessions.drain() {
            managed.handle.cancel();
            self.broadcaster_index.remove(&managed.broadcaster_id);
            self.metrics.session_removed();

            match tokio::time::timeout(SESSION_DRAIN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_panic() => {
                    error!(
                        target: "lc.actor.registry",
                        session_id = %session_id,
                        "Session actor panicked during shutdown"
                    );
                    self.metrics.record_panic(ActorType::Session);
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "lc.actor.registry",
                        session_id = %session_id,
                        error = %e,
                        "Session task aborted during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "lc.actor.registry",
                        session_id = %session_id,
                        "Session did not drain in time"
                    );
                }
            }
        }

        info!(target: "lc.actor.registry", "Registry graceful shutdown complete");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use signal_protocol::ServerFrame;
    use std::collections::HashMap as StdHashMap;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn test_config() -> Config {
        Config::from_vars(&StdHashMap::from([
            ("LC_MAX_SESSIONS".to_string(), "4".to_string()),
            ("LC_MAX_VIEWERS_PER_SESSION".to_string(), "10".to_string()),
            ("LC_ENDED_RETENTION_SECONDS".to_string(), "60".to_string()),
        ]))
        .unwrap()
    }

    fn sink() -> (FrameSink, UnboundedReceiver<ServerFrame>) {
        mpsc::unbounded_channel()
    }

    fn request(broadcaster_id: &str, title: &str, sink: FrameSink) -> NewSessionRequest {
        NewSessionRequest {
            broadcaster_id: broadcaster_id.to_string(),
            broadcaster_name: format!("{broadcaster_id}-name"),
            title: title.to_string(),
            description: None,
            category: None,
            tags: Vec::new(),
            is_private: false,
            settings: StreamSettings::default(),
            sink,
        }
    }

    #[tokio::test]
    async fn test_create_resolve_and_snapshot() {
        let (registry, _task) = RegistryHandle::new(&test_config(), CoordinatorMetrics::new());

        let (tx, _rx) = sink();
        let created = registry
            .create_session(request("b1", "Morning Walk", tx))
            .await
            .unwrap();
        assert_eq!(created.snapshot.phase, SessionPhase::Starting);
        assert_eq!(created.snapshot.broadcaster_id, "b1");

        let resolved = registry
            .resolve(created.snapshot.session_id.clone())
            .await
            .unwrap();
        assert_eq!(resolved.session_id(), created.snapshot.session_id);

        let snapshot = registry
            .get_session(created.snapshot.session_id.clone())
            .await
            .unwrap();
        assert_eq!(snapshot.title, "Morning Walk");

        registry.cancel();
    }

    #[tokio::test]
    async fn test_listing_shows_only_live_public_sessions() {
        let (registry, _task) = RegistryHandle::new(&test_config(), CoordinatorMetrics::new());

        // Starting session: not listed
        let (tx1, _rx1) = sink();
        let starting = registry
            .create_session(request("b1", "Not live yet", tx1))
            .await
            .unwrap();

        // Live public session: listed
        let (tx2, _rx2) = sink();
        let live = registry
            .create_session(request("b2", "Live one", tx2))
            .await
            .unwrap();
        live.handle.media_ready().await.unwrap();

        // Live private session: not listed
        let (tx3, _rx3) = sink();
        let mut private_req = request("b3", "Private one", tx3);
        private_req.is_private = true;
        let private = registry.create_session(private_req).await.unwrap();
        private.handle.media_ready().await.unwrap();

        let listed = registry.list_sessions().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].session_id, live.snapshot.session_id);

        drop(starting);
        registry.cancel();
    }

    #[tokio::test]
    async fn test_broadcaster_conflict_while_active() {
        let (registry, _task) = RegistryHandle::new(&test_config(), CoordinatorMetrics::new());

        let (tx1, _rx1) = sink();
        registry
            .create_session(request("b1", "First", tx1))
            .await
            .unwrap();

        let (tx2, _rx2) = sink();
        let result = registry.create_session(request("b1", "Second", tx2)).await;
        assert!(matches!(result, Err(LiveError::SessionConflict(_))));

        registry.cancel();
    }

    #[tokio::test]
    async fn test_broadcaster_can_go_live_again_after_ending() {
        let (registry, _task) = RegistryHandle::new(&test_config(), CoordinatorMetrics::new());

        let (tx1, _rx1) = sink();
        let first = registry
            .create_session(request("b1", "First", tx1))
            .await
            .unwrap();
        first.handle.media_ready().await.unwrap();
        registry
            .end_session(first.snapshot.session_id.clone(), "b1".to_string())
            .await
            .unwrap();

        // The ended session lingers in its retention window, but a new
        // stream from the same broadcaster evicts it.
        let (tx2, _rx2) = sink();
        let second = registry
            .create_session(request("b1", "Second", tx2))
            .await
            .unwrap();
        assert_ne!(second.snapshot.session_id, first.snapshot.session_id);

        registry.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcaster_resumes_within_grace() {
        let (registry, _task) = RegistryHandle::new(&test_config(), CoordinatorMetrics::new());

        let (tx1, _rx1) = sink();
        let first = registry
            .create_session(request("b1", "Walk", tx1))
            .await
            .unwrap();
        first.handle.media_ready().await.unwrap();
        assert!(!first.resumed);

        first.handle.broadcaster_disconnected().await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        // A new start from the same broadcaster reattaches the old session
        let (tx2, _rx2) = sink();
        let second = registry
            .create_session(request("b1", "Walk", tx2))
            .await
            .unwrap();
        assert!(second.resumed);
        assert_eq!(second.snapshot.session_id, first.snapshot.session_id);
        assert_eq!(second.snapshot.phase, SessionPhase::Live);

        // The grace timer was cleared; the session outlives the old deadline
        tokio::time::advance(Duration::from_secs(30)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let snapshot = registry
            .get_session(first.snapshot.session_id.clone())
            .await
            .unwrap();
        assert_eq!(snapshot.phase, SessionPhase::Live);

        registry.cancel();
    }

    #[tokio::test]
    async fn test_empty_title_rejected() {
        let (registry, _task) = RegistryHandle::new(&test_config(), CoordinatorMetrics::new());

        let (tx, _rx) = sink();
        let result = registry.create_session(request("b1", "   ", tx)).await;
        assert!(matches!(result, Err(LiveError::InvalidRequest(_))));

        registry.cancel();
    }

    #[tokio::test]
    async fn test_session_capacity_limit() {
        let config = Config::from_vars(&StdHashMap::from([(
            "LC_MAX_SESSIONS".to_string(),
            "1".to_string(),
        )]))
        .unwrap();
        let (registry, _task) = RegistryHandle::new(&config, CoordinatorMetrics::new());

        let (tx1, _rx1) = sink();
        registry
            .create_session(request("b1", "First", tx1))
            .await
            .unwrap();

        let (tx2, _rx2) = sink();
        let result = registry.create_session(request("b2", "Second", tx2)).await;
        assert!(matches!(result, Err(LiveError::CapacityExceeded(_))));

        registry.cancel();
    }

    #[tokio::test]
    async fn test_end_session_authorization_and_not_found() {
        let (registry, _task) = RegistryHandle::new(&test_config(), CoordinatorMetrics::new());

        let (tx, _rx) = sink();
        let created = registry
            .create_session(request("b1", "Stream", tx))
            .await
            .unwrap();
        created.handle.media_ready().await.unwrap();

        let result = registry
            .end_session(created.snapshot.session_id.clone(), "viewer".to_string())
            .await;
        assert!(matches!(result, Err(LiveError::Unauthorized(_))));

        let result = registry
            .end_session("missing".to_string(), "b1".to_string())
            .await;
        assert!(matches!(result, Err(LiveError::NotFound(_))));

        registry.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_drains_sessions() {
        let metrics = CoordinatorMetrics::new();
        let (registry, task) = RegistryHandle::new(&test_config(), Arc::clone(&metrics));

        let (tx, mut rx) = sink();
        let created = registry
            .create_session(request("b1", "Stream", tx))
            .await
            .unwrap();
        created.handle.media_ready().await.unwrap();

        registry.shutdown().await.unwrap();
        task.await.unwrap();

        assert_eq!(metrics.session_count(), 0);

        // The broadcaster got the single ended event on the way down
        let mut ended = 0;
        while let Ok(frame) = rx.try_recv() {
            if matches!(frame, ServerFrame::StreamEnded(_)) {
                ended += 1;
            }
        }
        assert_eq!(ended, 1);
    }

    #[tokio::test]
    async fn test_get_status_reports_session_count() {
        let (registry, _task) = RegistryHandle::new(&test_config(), CoordinatorMetrics::new());

        let status = registry.get_status().await.unwrap();
        assert_eq!(status.session_count, 0);
        assert!(!status.is_draining);

        let (tx, _rx) = sink();
        registry
            .create_session(request("b1", "Stream", tx))
            .await
            .unwrap();

        let status = registry.get_status().await.unwrap();
        assert_eq!(status.session_count, 1);

        registry.cancel();
    }
}
