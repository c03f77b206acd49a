//! Actor-based session coordination.
//!
//! Two actor types form a supervision tree:
//!
//! - `RegistryActor`: singleton, owns the session table, supervises sessions
//! - `SessionActor`: one per broadcast, owns all per-session state
//!
//! Handles communicate with actors through bounded mpsc mailboxes; requests
//! that need answers carry oneshot channels. Cancellation flows down the
//! `CancellationToken` hierarchy: cancelling the registry cancels every
//! session.

pub mod messages;
pub mod metrics;
pub mod negotiation;
pub mod registry;
pub mod session;

pub use messages::{CreateSessionResult, JoinAck, RegistryStatus, SessionSnapshot};
pub use metrics::{CoordinatorMetrics, CoordinatorMetricsSnapshot};
pub use registry::{NewSessionRequest, RegistryHandle};
pub use session::SessionActorHandle;
