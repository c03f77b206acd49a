//! Live Controller configuration.
//!
//! Configuration is loaded from `LC_*` environment variables with sensible
//! defaults; no variable is required.

use std::collections::HashMap;
use std::env;
use thiserror::Error;

/// Default WebSocket bind address.
pub const DEFAULT_WS_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default negotiation timeout in seconds.
pub const DEFAULT_NEGOTIATION_TIMEOUT_SECONDS: u64 = 30;

/// Default broadcaster disconnect grace period in seconds.
pub const DEFAULT_BROADCASTER_GRACE_SECONDS: u64 = 15;

/// Default retention of ended sessions before garbage collection, in seconds.
pub const DEFAULT_ENDED_RETENTION_SECONDS: u64 = 60;

/// Default client heartbeat timeout in seconds.
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECONDS: u64 = 90;

/// Default maximum concurrent sessions.
pub const DEFAULT_MAX_SESSIONS: u32 = 1000;

/// Default maximum viewers per session.
pub const DEFAULT_MAX_VIEWERS_PER_SESSION: u32 = 200;

/// Default LC instance ID prefix.
pub const DEFAULT_LC_ID_PREFIX: &str = "lc";

/// Live Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket server bind address (default: "0.0.0.0:8080").
    pub ws_bind_address: String,

    /// Health/metrics endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this LC instance.
    pub lc_id: String,

    /// Maximum concurrent sessions this LC can host.
    pub max_sessions: u32,

    /// Maximum viewers attached to a single session.
    pub max_viewers_per_session: u32,

    /// Seconds a negotiation may sit without an answer before it fails.
    pub negotiation_timeout_seconds: u64,

    /// Seconds a session survives a broadcaster disconnect.
    pub broadcaster_grace_seconds: u64,

    /// Seconds an ended session remains queryable before collection.
    pub ended_retention_seconds: u64,

    /// Seconds of client silence before the bus drops the connection.
    pub heartbeat_timeout_seconds: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Parse an optional numeric override, rejecting garbage instead of
/// silently falling back to the default.
fn parse_or<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable is set but unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable is set but unparseable.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let ws_bind_address = vars
            .get("LC_WS_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_WS_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("LC_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let max_sessions = parse_or(vars, "LC_MAX_SESSIONS", DEFAULT_MAX_SESSIONS)?;
        let max_viewers_per_session = parse_or(
            vars,
            "LC_MAX_VIEWERS_PER_SESSION",
            DEFAULT_MAX_VIEWERS_PER_SESSION,
        )?;
        let negotiation_timeout_seconds = parse_or(
            vars,
            "LC_NEGOTIATION_TIMEOUT_SECONDS",
            DEFAULT_NEGOTIATION_TIMEOUT_SECONDS,
        )?;
        let broadcaster_grace_seconds = parse_or(
            vars,
            "LC_BROADCASTER_GRACE_SECONDS",
            DEFAULT_BROADCASTER_GRACE_SECONDS,
        )?;
        let ended_retention_seconds = parse_or(
            vars,
            "LC_ENDED_RETENTION_SECONDS",
            DEFAULT_ENDED_RETENTION_SECONDS,
        )?;
        let heartbeat_timeout_seconds = parse_or(
            vars,
            "LC_HEARTBEAT_TIMEOUT_SECONDS",
            DEFAULT_HEARTBEAT_TIMEOUT_SECONDS,
        )?;

        // Generate LC instance ID
        let lc_id = vars.get("LC_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_LC_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            ws_bind_address,
            health_bind_address,
            lc_id,
            max_sessions,
            max_viewers_per_session,
            negotiation_timeout_seconds,
            broadcaster_grace_seconds,
            ended_retention_seconds,
            heartbeat_timeout_seconds,
        })
    }
}
