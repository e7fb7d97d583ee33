//! Device records tracked by the roster

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Label used for any attribute that could not be resolved
pub const UNKNOWN: &str = "Unknown";

/// A device seen on the local network, keyed by its IPv4 address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// IPv4 address (identity key within the registry)
    pub address: Ipv4Addr,
    /// Resolved hostname or `DEVICE_<last octet>` placeholder
    pub name: String,
    /// Label from the detection chain
    #[serde(rename = "type", default = "unknown")]
    pub device_type: String,
    /// MAC address, `Unknown` if never resolved
    #[serde(default = "unknown")]
    pub mac_address: String,
    /// Whether the last probe got a reply
    #[serde(default)]
    pub is_online: bool,
    /// When the device last answered a probe
    pub last_seen: DateTime<Utc>,
    /// Round-trip time of the last reply, zero while offline
    #[serde(default, rename = "response_time_ms", with = "millis")]
    pub response_time: Duration,
}

fn unknown() -> String {
    UNKNOWN.to_string()
}

impl Device {
    /// Create an offline device with placeholder name and unknown attributes
    pub fn new(address: Ipv4Addr) -> Self {
        Self {
            address,
            name: Self::placeholder_name(address),
            device_type: unknown(),
            mac_address: unknown(),
            is_online: false,
            last_seen: Utc::now(),
            response_time: Duration::ZERO,
        }
    }

    /// Create a device from a successful probe
    pub fn online(address: Ipv4Addr, response_time: Duration) -> Self {
        Self {
            is_online: true,
            response_time,
            ..Self::new(address)
        }
    }

    /// Name used when reverse lookup yields nothing
    pub fn placeholder_name(address: Ipv4Addr) -> String {
        format!("DEVICE_{}", address.octets()[3])
    }

    /// Whether a real MAC address is known for this device
    pub fn has_known_mac(&self) -> bool {
        !self.mac_address.is_empty() && self.mac_address != UNKNOWN
    }

    /// Record a missed probe
    pub fn mark_offline(&mut self) {
        self.is_online = false;
        self.response_time = Duration::ZERO;
    }

    /// Advance `last_seen`; older timestamps are ignored
    pub fn touch(&mut self, seen: DateTime<Utc>) {
        if seen > self.last_seen {
            self.last_seen = seen;
        }
    }

    /// Fold a fresh probe result into this record.
    ///
    /// A previously known MAC is kept when the probe failed to resolve one.
    pub fn merge_probe(&mut self, probe: &Device) {
        self.name = probe.name.clone();
        self.device_type = probe.device_type.clone();
        self.is_online = probe.is_online;
        self.response_time = if probe.is_online {
            probe.response_time
        } else {
            Duration::ZERO
        };
        self.touch(probe.last_seen);
        if probe.has_known_mac() {
            self.mac_address = probe.mac_address.clone();
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// Serialize a `Duration` as whole milliseconds
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
