//! Notification channels published by the scanner
//!
//! Each event category has its own broadcast channel so subscribers only
//! receive (and only have to match on) the kind of update they care about.
//! Sends never fail the scanner: with no subscribers an event is dropped.

use chrono::{DateTime, Utc};
use roster_core::Device;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

/// Severity of a progress message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressLevel {
    Info,
    Error,
}

/// Human readable progress text
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub level: ProgressLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn is_error(&self) -> bool {
        self.level == ProgressLevel::Error
    }
}

/// Roster change for a single device
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DeviceEvent {
    /// First time this address answered
    Discovered(Device),
    /// Known device re-probed (online or offline)
    Updated(Device),
    /// Explicitly removed from the roster
    Removed(Ipv4Addr),
}

impl DeviceEvent {
    pub fn address(&self) -> Ipv4Addr {
        match self {
            DeviceEvent::Discovered(device) | DeviceEvent::Updated(device) => device.address,
            DeviceEvent::Removed(address) => *address,
        }
    }
}

/// Continuous-mode timing
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ScheduleEvent {
    /// Next timer-driven sweep, `None` when not armed
    NextScan(Option<DateTime<Utc>>),
    /// A full sweep finished
    LastScanCompleted(DateTime<Utc>),
    /// Time left until the next sweep, refreshed every second while armed
    Countdown(#[serde(with = "secs")] Duration),
}

/// Publisher side of every scanner channel
#[derive(Debug, Clone)]
pub struct EventHub {
    progress: broadcast::Sender<ProgressEvent>,
    devices: broadcast::Sender<DeviceEvent>,
    scanning: broadcast::Sender<bool>,
    schedule: broadcast::Sender<ScheduleEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (progress, _) = broadcast::channel(capacity);
        let (devices, _) = broadcast::channel(capacity);
        let (scanning, _) = broadcast::channel(capacity);
        let (schedule, _) = broadcast::channel(capacity);
        Self {
            progress,
            devices,
            scanning,
            schedule,
        }
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    pub fn subscribe_devices(&self) -> broadcast::Receiver<DeviceEvent> {
        self.devices.subscribe()
    }

    /// `true` when a sweep starts, `false` when it ends
    pub fn subscribe_scanning(&self) -> broadcast::Receiver<bool> {
        self.scanning.subscribe()
    }

    pub fn subscribe_schedule(&self) -> broadcast::Receiver<ScheduleEvent> {
        self.schedule.subscribe()
    }

    pub fn progress(&self, message: impl Into<String>) {
        self.send_progress(ProgressLevel::Info, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send_progress(ProgressLevel::Error, message.into());
    }

    fn send_progress(&self, level: ProgressLevel, message: String) {
        let _ = self.progress.send(ProgressEvent {
            level,
            message,
            timestamp: Utc::now(),
        });
    }

    pub fn device(&self, event: DeviceEvent) {
        let _ = self.devices.send(event);
    }

    pub fn scanning(&self, running: bool) {
        let _ = self.scanning.send(running);
    }

    pub fn schedule(&self, event: ScheduleEvent) {
        let _ = self.schedule.send(event);
    }
}

mod secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }
}
