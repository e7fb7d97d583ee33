//! REST API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use roster_core::ScanOptions;
use roster_discovery::ScanState;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::state::{AppState, LAST_CONNECTED_IP};

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

fn error_response(status: StatusCode, msg: impl Into<String>) -> axum::response::Response {
    (status, Json(ApiError::new(msg))).into_response()
}

/// Scanner status
#[derive(Serialize)]
pub struct StatusResponse {
    state: ScanState,
    devices: usize,
    online: usize,
    next_scan: Option<DateTime<Utc>>,
    last_scan: Option<DateTime<Utc>>,
    last_connected_ip: Option<String>,
    detectors: Vec<String>,
    options: ScanOptions,
}

/// List all known devices
pub async fn list_devices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.devices().await)
}

/// Scanner state and schedule
pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let devices = state.devices().await;
    let status = StatusResponse {
        state: state.scanner.state(),
        online: devices.iter().filter(|d| d.is_online).count(),
        devices: devices.len(),
        next_scan: state.scanner.next_scan_time().await,
        last_scan: state.scanner.last_scan_time().await,
        last_connected_ip: state.setting(LAST_CONNECTED_IP).await,
        detectors: state.scanner.detector_names(),
        options: state.scanner.options().await,
    };
    Json(status)
}

/// Run a full sweep and return the resulting roster size
pub async fn trigger_scan(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.scanner.is_sweeping() {
        return error_response(StatusCode::CONFLICT, "Scan already in progress");
    }

    info!("Manual scan triggered");
    let devices = state.scanner.scan_network().await;
    Json(serde_json::json!({
        "status": "completed",
        "devices_found": devices.len(),
        "online": devices.iter().filter(|d| d.is_online).count(),
    }))
    .into_response()
}

/// Stop continuous scanning
pub async fn pause_scan(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.scanner.pause_scanning().await;
    Json(serde_json::json!({ "state": state.scanner.state() }))
}

/// Re-arm continuous scanning
pub async fn resume_scan(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.scanner.resume_scanning().await;
    Json(serde_json::json!({ "state": state.scanner.state() }))
}

/// Probe a single address without changing the roster
pub async fn probe_device(
    State(state): State<Arc<AppState>>,
    Path(ip): Path<String>,
) -> impl IntoResponse {
    match state.probe(&ip).await {
        Some(device) => Json(device).into_response(),
        None => error_response(StatusCode::BAD_REQUEST, format!("Invalid IP address: {}", ip)),
    }
}

/// Remove a device from the roster
pub async fn remove_device(
    State(state): State<Arc<AppState>>,
    Path(ip): Path<String>,
) -> impl IntoResponse {
    let Ok(address) = ip.parse::<Ipv4Addr>() else {
        return error_response(StatusCode::BAD_REQUEST, format!("Invalid IP address: {}", ip));
    };

    if state.scanner.remove_device(address).await.is_none() {
        return error_response(StatusCode::NOT_FOUND, "Device not found");
    }

    if let Err(e) = state.persist().await {
        warn!(error = %e, "Failed to persist roster after removal");
    }
    Json(serde_json::json!({ "status": "removed", "ip": address })).into_response()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use roster_core::{Device, MemoryStore, RosterStore};
    use roster_discovery::{DetectionChain, NetworkScanner, ScanBackends, StaticSubnetProvider};
    use tower::ServiceExt;

    /// State with no subnets to sweep, so no probe ever leaves the host
    pub(crate) async fn state_with_store(store: Arc<dyn RosterStore>) -> Arc<AppState> {
        let mut config = Config::default();
        config.scan.enable_continuous_scanning = false;
        let subnets = Arc::new(StaticSubnetProvider::new(Vec::new()).unwrap());
        let scanner = Arc::new(
            NetworkScanner::new(
                config.scan.clone(),
                ScanBackends::system(subnets),
                DetectionChain::default(),
            )
            .unwrap(),
        );
        AppState::from_parts(config, scanner, store).await
    }

    async fn call(
        state: Arc<AppState>,
        method: Method,
        uri: &str,
    ) -> (StatusCode, serde_json::Value) {
        let response = crate::server::router(state)
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn seeded_state() -> Arc<AppState> {
        let store = Arc::new(MemoryStore::new());
        let mut printer = Device::new(Ipv4Addr::new(192, 168, 1, 20));
        printer.name = "printer".to_string();
        store.save_devices(&[printer]).await.unwrap();
        state_with_store(store).await
    }

    #[tokio::test]
    async fn test_list_devices() {
        let (status, body) = call(seeded_state().await, Method::GET, "/api/devices").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["address"], "192.168.1.20");
        assert_eq!(body[0]["name"], "printer");
    }

    #[tokio::test]
    async fn test_status() {
        let (status, body) = call(seeded_state().await, Method::GET, "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "stopped");
        assert_eq!(body["devices"], 1);
        assert_eq!(body["online"], 0);
        assert_eq!(body["options"]["end_octet"], 254);
    }

    #[tokio::test]
    async fn test_probe_rejects_bad_address() {
        let (status, body) = call(seeded_state().await, Method::GET, "/api/probe/not-an-ip").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("not-an-ip"));
    }

    #[tokio::test]
    async fn test_remove_device() {
        let state = seeded_state().await;
        let (status, _) = call(state.clone(), Method::DELETE, "/api/devices/192.168.1.20").await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.devices().await.is_empty());

        let (status, _) = call(state.clone(), Method::DELETE, "/api/devices/192.168.1.20").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(state, Method::DELETE, "/api/devices/garbage").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_scan_without_subnets_keeps_roster() {
        let state = seeded_state().await;
        let (status, body) = call(state, Method::POST, "/api/scan").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["devices_found"], 1);
        assert_eq!(body["online"], 0);
    }

    #[tokio::test]
    async fn test_pause() {
        let (status, body) = call(seeded_state().await, Method::POST, "/api/scan/pause").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "stopped");
    }
}
