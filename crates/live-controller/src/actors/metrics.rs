//! Actor metrics and mailbox monitoring.
//!
//! Mailbox depth thresholds:
//!
//! | Actor Type | Normal | Warning | Critical |
//! |------------|--------|---------|----------|
//! | Registry   | < 200  | 200-800 | > 800    |
//! | Session    | < 100  | 100-500 | > 500    |
//!
//! Gauges and counters are exported with the `lc_` prefix through the
//! `metrics` recorder installed at startup.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth thresholds for the registry actor.
pub const REGISTRY_MAILBOX_NORMAL: usize = 200;
pub const REGISTRY_MAILBOX_WARNING: usize = 800;

/// Mailbox depth thresholds for session actors.
pub const SESSION_MAILBOX_NORMAL: usize = 100;
pub const SESSION_MAILBOX_WARNING: usize = 500;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// `RegistryActor` (singleton).
    Registry,
    /// `SessionActor` (one per broadcast session).
    Session,
}

impl ActorType {
    /// Returns the actor type as a string for metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Registry => "registry",
            ActorType::Session => "session",
        }
    }

    /// Returns the warning threshold for this actor type.
    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Registry => REGISTRY_MAILBOX_WARNING,
            ActorType::Session => SESSION_MAILBOX_WARNING,
        }
    }

    /// Returns the normal threshold for this actor type.
    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Registry => REGISTRY_MAILBOX_NORMAL,
            ActorType::Session => SESSION_MAILBOX_NORMAL,
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    /// Below normal threshold.
    Normal,
    /// Between normal and warning thresholds.
    Warning,
    /// Above warning threshold.
    Critical,
}

/// Mailbox monitor for tracking queue depth.
#[derive(Debug)]
pub struct MailboxMonitor {
    /// Actor type for labeling.
    actor_type: ActorType,
    /// Actor identifier (session id, instance id).
    actor_id: String,
    /// Current mailbox depth.
    depth: AtomicUsize,
    /// Peak mailbox depth since last reset.
    peak_depth: AtomicUsize,
    /// Total messages processed.
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    /// Create a new mailbox monitor for the given actor.
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record a message being added to the mailbox.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;

        // Update peak if necessary
        let mut current_peak = self.peak_depth.load(Ordering::Relaxed);
        while new_depth > current_peak {
            match self.peak_depth.compare_exchange_weak(
                current_peak,
                new_depth,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current_peak = actual,
            }
        }

        // Check thresholds and log warnings
        let level = self.level_for_depth(new_depth);
        if level == MailboxLevel::Critical {
            warn!(
                target: "lc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = new_depth,
                threshold = self.actor_type.warning_threshold(),
                "Mailbox depth critical"
            );
        } else if level == MailboxLevel::Warning && new_depth == self.actor_type.normal_threshold()
        {
            // Log once when crossing the warning threshold
            debug!(
                target: "lc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = new_depth,
                "Mailbox depth elevated"
            );
        }
    }

    /// Record a message being removed from the mailbox (processed).
    pub fn record_dequeue(&self) {
        self.depth.fetch_sub(1, Ordering::Relaxed);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current mailbox depth.
    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Get the peak mailbox depth.
    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    /// Get total messages processed.
    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    /// Get the current mailbox level.
    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    /// Determine mailbox level for a given depth.
    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth > self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Aggregated metrics for the coordinator.
///
/// Shared between the actor system (which updates values) and the
/// observability endpoints (which read them). All fields are atomic for
/// lock-free concurrent access; updates are mirrored into the `metrics`
/// recorder for Prometheus export.
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    /// Sessions currently hosted.
    active_sessions: AtomicUsize,
    /// Viewers attached across all sessions.
    active_viewers: AtomicUsize,
    /// Open WebSocket connections.
    active_connections: AtomicUsize,
    /// Total actor panics (indicates bugs).
    actor_panics: AtomicU64,
    /// Total messages processed across all actors.
    total_messages_processed: AtomicU64,
}

/// Snapshot of coordinator metrics at a point in time.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorMetricsSnapshot {
    pub sessions: usize,
    pub viewers: usize,
    pub connections: usize,
    pub panics: u64,
}

impl CoordinatorMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Increment active session count.
    pub fn session_created(&self) {
        let count = self.active_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::counter!("lc_sessions_started_total").increment(1);
        metrics::gauge!("lc_active_sessions").set(count as f64);
    }

    /// Decrement active session count.
    pub fn session_removed(&self) {
        let count = self.active_sessions.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::counter!("lc_sessions_ended_total").increment(1);
        metrics::gauge!("lc_active_sessions").set(count as f64);
    }

    /// Increment attached viewer count.
    pub fn viewer_joined(&self) {
        let count = self.active_viewers.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::counter!("lc_viewer_joins_total").increment(1);
        metrics::gauge!("lc_active_viewers").set(count as f64);
    }

    /// Decrement attached viewer count.
    pub fn viewer_left(&self) {
        let count = self.active_viewers.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::gauge!("lc_active_viewers").set(count as f64);
    }

    /// Increment open connection count.
    pub fn connection_opened(&self) {
        let count = self.active_connections.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::gauge!("lc_active_connections").set(count as f64);
    }

    /// Decrement open connection count.
    pub fn connection_closed(&self) {
        let count = self.active_connections.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::gauge!("lc_active_connections").set(count as f64);
    }

    /// Record an actor panic.
    pub fn record_panic(&self, actor_type: ActorType) {
        self.actor_panics.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("lc_actor_panics_total", "actor_type" => actor_type.as_str())
            .increment(1);
        tracing::error!(
            target: "lc.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = self.actor_panics.load(Ordering::Relaxed),
            "Actor panic detected - indicates bug, investigation required"
        );
    }

    /// Record a message being processed.
    pub fn record_message_processed(&self) {
        self.total_messages_processed
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Get current session count.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }

    /// Get current viewer count.
    #[must_use]
    pub fn viewer_count(&self) -> usize {
        self.active_viewers.load(Ordering::SeqCst)
    }

    /// Get current connection count.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Take an atomic snapshot of current metrics.
    #[must_use]
    pub fn snapshot(&self) -> CoordinatorMetricsSnapshot {
        CoordinatorMetricsSnapshot {
            sessions: self.active_sessions.load(Ordering::SeqCst),
            viewers: self.active_viewers.load(Ordering::SeqCst),
            connections: self.active_connections.load(Ordering::SeqCst),
            panics: self.actor_panics.load(Ordering::Relaxed),
        }
    }
}
