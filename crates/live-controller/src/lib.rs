//! Live Controller (LC) Service Library
//!
//! Core functionality for the Livecast Live Controller - a stateful
//! WebSocket signaling server responsible for:
//!
//! - Live broadcast session registry and discovery
//! - WebRTC offer/answer/ICE relay between a broadcaster and each viewer
//! - Real-time fan-out of comments, reactions and audience counts
//! - Session lifecycle management with broadcaster-disconnect grace periods
//! - Graceful shutdown that drains active sessions
//!
//! # Architecture
//!
//! The LC uses an actor model hierarchy:
//!
//! ```text
//! RegistryActor (singleton per LC instance)
//! └── supervises N SessionActors
//!     └── SessionActor (one per live broadcast)
//!         ├── owns session state (phase, audience, negotiations)
//!         └── publishes events through its FanoutChannel
//! ```
//!
//! Connection tasks (one per WebSocket client) live in [`bus`]; they hold an
//! unbounded outbound sink that sessions publish into, so a slow client
//! never blocks a session actor.
//!
//! # Key Design Decisions
//!
//! - **One actor per session**: all per-session operations are serialized
//!   through one mailbox; no locks on session state
//! - **Server relays, clients negotiate**: the LC never parses SDP, it
//!   routes descriptions and candidates per (session, viewer) pair
//! - **Buffered trickle ICE**: candidates that arrive before the receiving
//!   peer has a remote description are held and drained in order
//!
//! # Modules
//!
//! - [`actors`] - Registry and session actors
//! - [`bus`] - WebSocket signaling transport
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error taxonomy with stable wire codes
//! - [`fanout`] - Per-session event fan-out
//! - [`lifecycle`] - Session phase state machine
//! - [`media`] - Local media capture abstraction
//! - [`observability`] - Health probes and metrics export

pub mod actors;
pub mod bus;
pub mod config;
pub mod errors;
pub mod fanout;
pub mod lifecycle;
pub mod media;
pub mod observability;
