//! Live Controller
//!
//! Stateful WebSocket signaling server for live broadcast coordination.
//!
//! # Servers
//!
//! The Live Controller runs two servers:
//! - WebSocket server for client signaling (default: 0.0.0.0:8080)
//! - HTTP server for health and metrics endpoints (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Initialize actor system (`RegistryHandle`)
//! 4. Start health HTTP server (liveness, readiness, metrics)
//! 5. Start WebSocket signaling server and mark ready
//! 6. Wait for shutdown signal, then drain sessions gracefully

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use axum::Router;
use live_controller::actors::metrics::CoordinatorMetrics;
use live_controller::actors::registry::RegistryHandle;
use live_controller::bus::{self, BusState};
use live_controller::config::Config;
use live_controller::observability::{health_router, HealthState};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "live_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Live Controller");

    // Load configuration
    let config = Config::from_env()
        .map_err(|e| {
            error!("Failed to load configuration: {}", e);
            e
        })
        .context("configuration")?;

    info!(
        lc_id = %config.lc_id,
        ws_bind_address = %config.ws_bind_address,
        health_bind_address = %config.health_bind_address,
        max_sessions = config.max_sessions,
        max_viewers_per_session = config.max_viewers_per_session,
        negotiation_timeout_seconds = config.negotiation_timeout_seconds,
        broadcaster_grace_seconds = config.broadcaster_grace_seconds,
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder before any metrics are recorded
    let prometheus_handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        anyhow!("Failed to install Prometheus metrics recorder: {e}")
    })?;
    info!("Prometheus metrics recorder initialized");

    // Initialize health state
    let health_state = Arc::new(HealthState::new());

    // Initialize actor system
    let metrics = CoordinatorMetrics::new();
    let (registry, registry_task) = RegistryHandle::new(&config, Arc::clone(&metrics));
    info!("Actor system initialized");

    // Start health HTTP server (must succeed; fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        anyhow!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind before spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            anyhow!("Failed to bind health server to {health_addr}: {e}")
        })?;
    info!(addr = %health_addr, "Health server bound successfully");

    // The registry token doubles as the process-wide shutdown token
    let health_shutdown = registry.child_token();
    tokio::spawn(async move {
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Start WebSocket signaling server
    let ws_addr: SocketAddr = config.ws_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.ws_bind_address, "Invalid WebSocket bind address");
        anyhow!("Invalid WebSocket bind address: {e}")
    })?;

    let bus_state = BusState {
        registry: registry.clone(),
        metrics: Arc::clone(&metrics),
        heartbeat_timeout: Duration::from_secs(config.heartbeat_timeout_seconds),
    };
    let ws_app = bus::router(bus_state).layer(TraceLayer::new_for_http());

    let ws_listener = tokio::net::TcpListener::bind(ws_addr).await.map_err(|e| {
        error!(error = %e, addr = %ws_addr, "Failed to bind WebSocket server");
        anyhow!("Failed to bind WebSocket server to {ws_addr}: {e}")
    })?;
    info!(addr = %ws_addr, "WebSocket server bound successfully");

    let ws_shutdown = registry.child_token();
    let ws_server = tokio::spawn(async move {
        let server = axum::serve(ws_listener, ws_app).with_graceful_shutdown(async move {
            ws_shutdown.cancelled().await;
            info!("WebSocket server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "WebSocket server failed");
        }
    });

    // Ready: both servers bound and the actor system is up
    health_state.set_ready();
    info!("Live Controller running - press Ctrl+C to shutdown");

    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Stop advertising readiness so the load balancer routes new clients away
    health_state.set_not_ready();

    // Drain sessions: every attached client gets its stream_ended event
    if let Err(e) = registry.shutdown().await {
        warn!(error = %e, "Registry shutdown error");
    }
    registry.cancel();

    if let Err(e) = registry_task.await {
        warn!(error = %e, "Registry task join error");
    }
    if let Err(e) = ws_server.await {
        warn!(error = %e, "WebSocket server join error");
    }

    info!("Live Controller shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. Without them the service
/// could never shut down gracefully.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
