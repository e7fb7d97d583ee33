//! Scan options

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Longest accepted continuous scan interval (one week)
pub const MAX_SCAN_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum OptionsError {
    #[error("start octet must be between 1 and 254, got {0}")]
    StartOctet(u8),
    #[error("end octet must be between 1 and 254, got {0}")]
    EndOctet(u8),
    #[error("start octet {start} is greater than end octet {end}")]
    EmptyRange { start: u8, end: u8 },
    #[error("max concurrent connections must be at least 1")]
    NoConcurrency,
    #[error("devices before throttle must be at least 1")]
    NoThrottleBatch,
    #[error("scan interval must be at least one minute in continuous mode")]
    NoInterval,
    #[error("scan interval must be at most {MAX_SCAN_INTERVAL_MINUTES} minutes, got {0}")]
    IntervalTooLong(u64),
}

/// Immutable snapshot of the settings that drive a sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Minutes between continuous sweeps
    pub scan_interval_minutes: u64,
    /// Upper bound on probes in flight
    pub max_concurrent_connections: usize,
    /// ICMP echo timeout
    pub ping_timeout_ms: u64,
    /// First host octet to probe (inclusive)
    pub start_octet: u8,
    /// Last host octet to probe (inclusive)
    pub end_octet: u8,
    /// Pause inserted after every `devices_before_throttle` dispatches
    pub network_throttle_delay_ms: u64,
    pub devices_before_throttle: usize,
    /// Re-sweep on a timer after `start_scanning`
    pub enable_continuous_scanning: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            scan_interval_minutes: 5,
            max_concurrent_connections: 20,
            ping_timeout_ms: 2000,
            start_octet: 1,
            end_octet: 254,
            network_throttle_delay_ms: 50,
            devices_before_throttle: 10,
            enable_continuous_scanning: true,
        }
    }
}

impl ScanOptions {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_minutes.saturating_mul(60))
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn throttle_delay(&self) -> Duration {
        Duration::from_millis(self.network_throttle_delay_ms)
    }

    /// Number of addresses swept per subnet prefix
    pub fn addresses_per_subnet(&self) -> usize {
        if self.start_octet > self.end_octet {
            0
        } else {
            (self.end_octet - self.start_octet) as usize + 1
        }
    }

    /// Check the options describe a sweep that can actually run
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.start_octet == 0 || self.start_octet == 255 {
            return Err(OptionsError::StartOctet(self.start_octet));
        }
        if self.end_octet == 0 || self.end_octet == 255 {
            return Err(OptionsError::EndOctet(self.end_octet));
        }
        if self.start_octet > self.end_octet {
            return Err(OptionsError::EmptyRange {
                start: self.start_octet,
                end: self.end_octet,
            });
        }
        if self.max_concurrent_connections == 0 {
            return Err(OptionsError::NoConcurrency);
        }
        if self.devices_before_throttle == 0 {
            return Err(OptionsError::NoThrottleBatch);
        }
        if self.enable_continuous_scanning && self.scan_interval_minutes == 0 {
            return Err(OptionsError::NoInterval);
        }
        if self.scan_interval_minutes > MAX_SCAN_INTERVAL_MINUTES {
            return Err(OptionsError::IntervalTooLong(self.scan_interval_minutes));
        }
        Ok(())
    }
}
