//! Voice Room Signaling Service
//!
//! WebSocket signaling, server-side WebRTC sessions and ephemeral TURN
//! credentials for voice rooms.
//!
//! # Servers
//!
//! - Signaling server: WebSocket + HTTP (default: 0.0.0.0:8080)
//! - Health server: `/health`, `/ready`, `/metrics` (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Initialize tracing
//! 2. Load configuration from environment
//! 3. Initialize Prometheus metrics recorder
//! 4. Create the relay credential service
//! 5. Create the webrtc-rs media engine
//! 6. Start the session manager (event loop + cleanup sweep)
//! 7. Spawn the hub actor
//! 8. Start health HTTP server
//! 9. Start signaling server
//! 10. Mark ready and wait for shutdown signal

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use common::config::{LogFormat, ObservabilityConfig};
use relay_credentials::CredentialService;
use signaling_service::actors::HubHandle;
use signaling_service::config::{Config, DEFAULT_LOG_FILTER};
use signaling_service::edge::{build_routes, AllowAllMembership, AppState, JwtTokenValidator};
use signaling_service::errors::SignalingError;
use signaling_service::observability::{health_router, init_metrics_recorder, HealthState};
use signaling_service::sessions::{
    MediaEngine, SessionManager, SessionSettings, SessionTeardown, WebRtcEngine,
};
use signaling_service::transport::PumpSettings;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Capacity of the session manager -> hub notice channel.
const SESSION_NOTICE_BUFFER: usize = 1024;

/// Upper bound on waiting for background tasks after cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let vars: HashMap<String, String> = std::env::vars().collect();
    init_tracing(&ObservabilityConfig::from_vars(&vars, DEFAULT_LOG_FILTER));

    info!("Starting signaling service");

    // Load configuration
    let config = Config::from_vars(&vars).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        stun_urls = ?config.stun_urls,
        turn_urls = ?config.turn_urls,
        credential_ttl_seconds = config.credential_ttl.as_secs(),
        client_queue_capacity = config.client_queue_capacity,
        session_idle_timeout_seconds = config.session_idle_timeout.as_secs(),
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder
    // This must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        SignalingError::Fatal(e)
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());
    let root_token = CancellationToken::new();

    // Relay credentials; the listener settings are handed to the relay server as-is
    let credentials = Arc::new(
        CredentialService::new(&config.turn_shared_secret, config.credential_ttl).map_err(
            |e| {
                error!(error = %e, "Invalid relay shared secret");
                SignalingError::Fatal(format!("relay credential service: {e}"))
            },
        )?,
    );
    info!(relay_listener = ?config.relay_listener, "Relay listener configuration");

    // Media engine
    let engine: Arc<dyn MediaEngine> = Arc::new(WebRtcEngine::new().map_err(|e| {
        error!(error = %e, "Failed to create media engine");
        SignalingError::Fatal(format!("media engine: {e}"))
    })?);

    // Session manager, then the hub that consumes its notices
    let (notice_tx, notice_rx) = mpsc::channel(SESSION_NOTICE_BUFFER);
    let (sessions, session_tasks) = SessionManager::start(
        engine,
        credentials,
        SessionSettings::from_config(&config),
        notice_tx,
        root_token.child_token(),
    );
    info!("Session manager started");

    let (hub, hub_task) = HubHandle::spawn(
        config.client_queue_capacity,
        Arc::clone(&sessions) as Arc<dyn SessionTeardown>,
        notice_rx,
        root_token.child_token(),
    );
    info!("Hub started");

    // Start health HTTP server (MUST succeed - fail startup if it doesn't)
    let health_addr = parse_addr(&config.health_bind_address, "health")?;
    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind listeners BEFORE spawning to fail fast on bind errors
    let health_listener = bind(health_addr, "health").await?;
    let health_shutdown_token = root_token.child_token();
    let health_task = tokio::spawn(async move {
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });
    info!(addr = %health_addr, "Health server started");

    // Start signaling server
    let signaling_addr = parse_addr(&config.bind_address, "signaling")?;
    let state = Arc::new(AppState::new(
        hub.clone(),
        Arc::clone(&sessions),
        Arc::new(JwtTokenValidator::new(config.jwt_secret.clone())),
        Arc::new(AllowAllMembership),
        PumpSettings::from_config(&config),
    ));
    let signaling_app = build_routes(state);

    let signaling_listener = bind(signaling_addr, "signaling").await?;
    let signaling_shutdown_token = root_token.child_token();
    let signaling_task = tokio::spawn(async move {
        let server = axum::serve(signaling_listener, signaling_app).with_graceful_shutdown(
            async move {
                signaling_shutdown_token.cancelled().await;
                info!("Signaling server shutting down");
            },
        );
        if let Err(e) = server.await {
            error!(error = %e, "Signaling server failed");
        }
    });
    info!(addr = %signaling_addr, "Signaling server started");

    health_state.set_ready();
    info!("Signaling service running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so load balancers stop sending sockets
    health_state.set_not_ready();

    // Hub first so every client socket gets its close frame, then sessions
    hub.shutdown();
    sessions.shutdown().await;
    root_token.cancel();

    let background = async {
        if let Err(e) = hub_task.await {
            warn!(error = %e, "Hub task ended abnormally");
        }
        for task in session_tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Session task ended abnormally");
            }
        }
        let _ = signaling_task.await;
        let _ = health_task.await;
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, background).await.is_err() {
        warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "Background tasks did not stop in time"
        );
    }

    info!("Signaling service shutdown complete");
    Ok(())
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| observability.default_filter.clone().into());
    let registry = tracing_subscriber::registry().with(filter);

    match observability.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn parse_addr(raw: &str, server: &str) -> Result<SocketAddr, SignalingError> {
    raw.parse().map_err(|e| {
        error!(error = %e, addr = %raw, server, "Invalid bind address");
        SignalingError::Fatal(format!("invalid {server} bind address {raw}: {e}"))
    })
}

async fn bind(addr: SocketAddr, server: &str) -> Result<tokio::net::TcpListener, SignalingError> {
    tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, server, "Failed to bind");
        SignalingError::Fatal(format!("failed to bind {server} server to {addr}: {e}"))
    })
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
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
