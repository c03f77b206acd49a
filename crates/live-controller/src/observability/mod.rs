//! Observability: health probes and metrics export.

pub mod health;

pub use health::{health_router, HealthState};
