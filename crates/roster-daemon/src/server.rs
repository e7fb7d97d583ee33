//! Web server setup and routing

use anyhow::{Context, Result};
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api;
use crate::state::AppState;
use crate::ws;

/// Routes for the REST API and the event socket
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/devices", get(api::list_devices))
        .route("/api/devices/{ip}", delete(api::remove_device))
        .route("/api/status", get(api::get_status))
        .route("/api/scan", post(api::trigger_scan))
        .route("/api/scan/pause", post(api::pause_scan))
        .route("/api/scan/resume", post(api::resume_scan))
        .route("/api/probe/{ip}", get(api::probe_device))
        // WebSocket for real-time updates
        .route("/ws", get(ws::websocket_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the web server until Ctrl-C, then stop scanning and save the roster
pub async fn run(state: Arc<AppState>, bind: &str) -> Result<()> {
    let app = router(state.clone());

    if state.config.daemon.autostart {
        state.scanner.start_scanning().await;
    } else {
        info!("Autostart disabled, waiting for /api/scan/resume");
    }

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!(address = %bind, protocol = "HTTP", "Starting web server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    state.scanner.pause_scanning().await;
    state.persist().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
