//! Configuration loading and validation

use anyhow::{Context, Result};
use roster_core::ScanOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub scan: ScanOptions,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub detectors: DetectorsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for web server
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Arm continuous scanning on startup
    #[serde(default = "default_true")]
    pub autostart: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            autostart: true,
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Subnet prefixes to sweep, e.g. "192.168.1". Empty = local interfaces.
    #[serde(default)]
    pub subnets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorsConfig {
    /// SSDP discovery plus device description lookup
    #[serde(default = "default_true")]
    pub upnp: bool,
    /// Well-known TCP ports
    #[serde(default = "default_true")]
    pub ports: bool,
    /// SSH identification banner
    #[serde(default = "default_true")]
    pub ssh: bool,
    /// How long SSDP replies are collected
    #[serde(default = "default_upnp_timeout")]
    pub upnp_timeout_ms: u64,
    /// Per-connection timeout for port and banner checks
    #[serde(default = "default_port_timeout")]
    pub port_timeout_ms: u64,
}

impl Default for DetectorsConfig {
    fn default() -> Self {
        Self {
            upnp: true,
            ports: true,
            ssh: true,
            upnp_timeout_ms: default_upnp_timeout(),
            port_timeout_ms: default_port_timeout(),
        }
    }
}

fn default_upnp_timeout() -> u64 {
    2000
}

fn default_port_timeout() -> u64 {
    400
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_devices_path")]
    pub devices_path: String,
    #[serde(default = "default_settings_path")]
    pub settings_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            devices_path: default_devices_path(),
            settings_path: default_settings_path(),
        }
    }
}

fn default_devices_path() -> String {
    "data/devices.json".to_string()
}

fn default_settings_path() -> String {
    "data/settings.json".to_string()
}

/// Load configuration from file, falling back to defaults when it is missing
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config
            .scan
            .validate()
            .with_context(|| format!("Invalid [scan] section in {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
