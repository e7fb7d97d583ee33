//! WebSocket handler for real-time updates

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use roster_core::Device;
use roster_discovery::{DeviceEvent, ProgressLevel, ScheduleEvent};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::state::{AppState, RosterEvent};

/// WebSocket message types
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum WsMessage {
    DeviceDiscovered(Device),
    DeviceUpdated(Device),
    DeviceRemoved { ip: Ipv4Addr },
    Progress { level: ProgressLevel, message: String },
    ScanStarted,
    ScanCompleted,
    NextScan { at: Option<DateTime<Utc>> },
    LastScanCompleted { at: DateTime<Utc> },
    Countdown { seconds: u64 },
    Pong,
}

impl From<RosterEvent> for WsMessage {
    fn from(event: RosterEvent) -> Self {
        match event {
            RosterEvent::Progress(progress) => WsMessage::Progress {
                level: progress.level,
                message: progress.message,
            },
            RosterEvent::Device(DeviceEvent::Discovered(device)) => {
                WsMessage::DeviceDiscovered(device)
            }
            RosterEvent::Device(DeviceEvent::Updated(device)) => WsMessage::DeviceUpdated(device),
            RosterEvent::Device(DeviceEvent::Removed(ip)) => WsMessage::DeviceRemoved { ip },
            RosterEvent::Scanning(true) => WsMessage::ScanStarted,
            RosterEvent::Scanning(false) => WsMessage::ScanCompleted,
            RosterEvent::Schedule(ScheduleEvent::NextScan(at)) => WsMessage::NextScan { at },
            RosterEvent::Schedule(ScheduleEvent::LastScanCompleted(at)) => {
                WsMessage::LastScanCompleted { at }
            }
            RosterEvent::Schedule(ScheduleEvent::Countdown(remaining)) => WsMessage::Countdown {
                seconds: remaining.as_secs(),
            },
        }
    }
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.subscribe();

    info!("WebSocket client connected");

    // Send current roster on connect
    let mut initial = Vec::new();
    for device in state.devices().await {
        initial.push(WsMessage::DeviceDiscovered(device));
    }
    initial.push(WsMessage::NextScan {
        at: state.scanner.next_scan_time().await,
    });
    if let Some(at) = state.scanner.last_scan_time().await {
        initial.push(WsMessage::LastScanCompleted { at });
    }
    for msg in initial {
        if let Ok(json) = serde_json::to_string(&msg) {
            if sender.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let msg = WsMessage::from(event);
                        if let Ok(json) = serde_json::to_string(&msg) {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        debug!(skipped = n, "Roster event channel lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        if text.as_str() == "ping" {
                            if let Ok(pong) = serde_json::to_string(&WsMessage::Pong) {
                                if sender.send(Message::Text(pong.into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_message_json() {
        let msg = WsMessage::from(RosterEvent::Schedule(ScheduleEvent::Countdown(
            Duration::from_secs(42),
        )));
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"countdown","data":{"seconds":42}}"#
        );

        let msg = WsMessage::from(RosterEvent::Scanning(true));
        assert_eq!(serde_json::to_string(&msg).unwrap(), r#"{"type":"scan_started"}"#);

        let msg = WsMessage::from(RosterEvent::Device(DeviceEvent::Removed(Ipv4Addr::new(
            10, 0, 0, 1,
        ))));
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"device_removed","data":{"ip":"10.0.0.1"}}"#
        );
    }
}
