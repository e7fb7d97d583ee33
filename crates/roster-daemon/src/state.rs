//! Application state management

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use roster_core::{Device, JsonFileStore, RosterStore, Settings};
use roster_discovery::{
    DetectionChain, Detector, DeviceEvent, InterfaceSubnetProvider, NetworkScanner, PortDetector,
    ProgressEvent, ScanBackends, ScheduleEvent, SshBannerDetector, StaticSubnetProvider,
    SubnetProvider, UpnpDetector,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::config::{Config, DetectorsConfig};

/// Settings key holding the completion time of the last full sweep
pub const LAST_SCAN_COMPLETED: &str = "last_scan_completed";
/// Settings key holding the last address probed on demand
pub const LAST_CONNECTED_IP: &str = "last_connected_ip";

const PORT_PRIORITY: i32 = 30;
const SSH_PRIORITY: i32 = 20;
const UPNP_PRIORITY: i32 = 10;

/// Everything the scanner publishes, merged into one stream for clients
#[derive(Debug, Clone)]
pub enum RosterEvent {
    Progress(ProgressEvent),
    Device(DeviceEvent),
    Scanning(bool),
    Schedule(ScheduleEvent),
}

/// Shared application state
pub struct AppState {
    /// Network scanner owning the roster
    pub scanner: Arc<NetworkScanner>,
    /// Roster and settings persistence
    pub store: Arc<dyn RosterStore>,
    /// Persisted key/value settings
    pub settings: RwLock<Settings>,
    /// Configuration
    pub config: Config,
    /// Event broadcast for WebSocket clients
    pub events: broadcast::Sender<RosterEvent>,
}

impl AppState {
    /// Create application state with system network adapters and JSON storage
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let subnets: Arc<dyn SubnetProvider> = if config.discovery.subnets.is_empty() {
            info!("No subnets configured, sweeping local interfaces");
            Arc::new(InterfaceSubnetProvider)
        } else {
            Arc::new(
                StaticSubnetProvider::new(config.discovery.subnets.clone())
                    .context("Invalid [discovery] subnets")?,
            )
        };

        let chain = build_detection_chain(&config.detectors)?;
        info!(detectors = ?chain.names(), "Detection chain ready");

        let scanner = Arc::new(NetworkScanner::new(
            config.scan.clone(),
            ScanBackends::system(subnets),
            chain,
        )?);

        let store = Arc::new(JsonFileStore::new(
            &config.storage.devices_path,
            &config.storage.settings_path,
        ));

        Ok(Self::from_parts(config, scanner, store).await)
    }

    /// Wire an existing scanner and store: hydrate the roster and start
    /// forwarding scanner events
    pub async fn from_parts(
        config: Config,
        scanner: Arc<NetworkScanner>,
        store: Arc<dyn RosterStore>,
    ) -> Arc<Self> {
        match store.load_devices().await {
            Ok(devices) => {
                let count = scanner.registry().hydrate(devices).await;
                info!(devices = count, "Roster loaded");
            }
            Err(e) => warn!(error = %e, "Failed to load roster, starting empty"),
        }

        let settings = match store.load_settings().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "Failed to load settings, using defaults");
                Settings::new()
            }
        };

        let (events, _) = broadcast::channel(256);

        let state = Arc::new(Self {
            scanner,
            store,
            settings: RwLock::new(settings),
            config,
            events,
        });

        spawn_event_forwarder(state.clone());
        state
    }

    /// Subscribe to merged scanner events
    pub fn subscribe(&self) -> broadcast::Receiver<RosterEvent> {
        self.events.subscribe()
    }

    pub async fn devices(&self) -> Vec<Device> {
        self.scanner.devices().await
    }

    pub async fn setting(&self, key: &str) -> Option<String> {
        self.settings.read().await.get(key).cloned()
    }

    async fn set_setting(&self, key: &str, value: String) {
        self.settings.write().await.insert(key.to_string(), value);
    }

    /// Probe a single address on demand and remember it
    pub async fn probe(&self, address: &str) -> Option<Device> {
        let device = self.scanner.scan_single_device(address).await?;
        self.set_setting(LAST_CONNECTED_IP, device.address.to_string())
            .await;
        if let Err(e) = self.save_settings().await {
            warn!(error = %e, "Failed to save settings");
        }
        Some(device)
    }

    async fn save_settings(&self) -> Result<()> {
        let settings = self.settings.read().await.clone();
        self.store
            .save_settings(&settings)
            .await
            .context("Failed to save settings")
    }

    /// Write the roster and settings to storage
    pub async fn persist(&self) -> Result<()> {
        let devices = self.scanner.devices().await;
        self.store
            .save_devices(&devices)
            .await
            .context("Failed to save roster")?;
        self.save_settings().await?;
        debug!(devices = devices.len(), "Roster saved");
        Ok(())
    }

    async fn handle_event(&self, event: &RosterEvent) {
        match event {
            RosterEvent::Progress(progress) if progress.is_error() => {
                warn!(message = %progress.message, "Scan error");
            }
            RosterEvent::Progress(progress) => {
                debug!(message = %progress.message, "Scan progress");
            }
            RosterEvent::Schedule(ScheduleEvent::LastScanCompleted(at)) => {
                self.set_setting(
                    LAST_SCAN_COMPLETED,
                    at.to_rfc3339_opts(SecondsFormat::Secs, true),
                )
                .await;
                if let Err(e) = self.persist().await {
                    warn!(error = %e, "Failed to persist roster after sweep");
                }
            }
            RosterEvent::Device(DeviceEvent::Removed(ip)) => {
                info!(ip = %ip, "Device removed");
            }
            _ => {}
        }
    }
}

/// Build the detector chain enabled in configuration
pub fn build_detection_chain(config: &DetectorsConfig) -> Result<DetectionChain> {
    let timeout = Duration::from_millis(config.port_timeout_ms);
    let mut detectors: Vec<Arc<dyn Detector>> = Vec::new();

    if config.ports {
        detectors.push(Arc::new(PortDetector::new(PORT_PRIORITY, timeout)));
    }
    if config.ssh {
        detectors.push(Arc::new(SshBannerDetector::new(SSH_PRIORITY, timeout)));
    }
    if config.upnp {
        let detector = UpnpDetector::new(
            UPNP_PRIORITY,
            Duration::from_millis(config.upnp_timeout_ms),
        )?;
        detectors.push(Arc::new(detector));
    }

    Ok(DetectionChain::new(detectors))
}

/// Merge the scanner channels, mirror them to the log and fan them out
fn spawn_event_forwarder(state: Arc<AppState>) {
    let hub = state.scanner.events();
    let mut progress = hub.subscribe_progress();
    let mut devices = hub.subscribe_devices();
    let mut scanning = hub.subscribe_scanning();
    let mut schedule = hub.subscribe_schedule();

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                event = progress.recv() => event.map(RosterEvent::Progress),
                event = devices.recv() => event.map(RosterEvent::Device),
                event = scanning.recv() => event.map(RosterEvent::Scanning),
                event = schedule.recv() => event.map(RosterEvent::Schedule),
            };

            match event {
                Ok(event) => {
                    state.handle_event(&event).await;
                    // Forward to WebSocket clients
                    let _ = state.events.send(event);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Scanner event channel lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_core::MemoryStore;
    use std::net::Ipv4Addr;

    #[test]
    fn test_detection_chain_order() {
        let chain = build_detection_chain(&DetectorsConfig::default()).unwrap();
        assert_eq!(chain.names(), vec!["ports", "ssh", "upnp"]);

        let config = DetectorsConfig {
            upnp: false,
            ports: false,
            ..Default::default()
        };
        assert_eq!(build_detection_chain(&config).unwrap().names(), vec!["ssh"]);
    }

    #[tokio::test]
    async fn test_hydrates_from_store() {
        let store = Arc::new(MemoryStore::new());
        store
            .save_devices(&[Device::new(Ipv4Addr::new(10, 0, 0, 4))])
            .await
            .unwrap();

        let state = crate::api::tests::state_with_store(store).await;
        assert_eq!(state.devices().await.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_probe_keeps_settings() {
        let state = crate::api::tests::state_with_store(Arc::new(MemoryStore::new())).await;
        assert!(state.probe("nope").await.is_none());
        assert!(state.setting(LAST_CONNECTED_IP).await.is_none());
    }

    #[tokio::test]
    async fn test_persist_writes_roster_and_settings() {
        let store = Arc::new(MemoryStore::new());
        let state = crate::api::tests::state_with_store(store.clone()).await;
        state
            .scanner
            .registry()
            .upsert(Device::new(Ipv4Addr::new(10, 0, 0, 8)))
            .await;
        state
            .set_setting(LAST_SCAN_COMPLETED, "2026-01-01T00:00:00Z".to_string())
            .await;

        state.persist().await.unwrap();

        assert_eq!(store.load_devices().await.unwrap().len(), 1);
        assert_eq!(
            store.load_settings().await.unwrap().get(LAST_SCAN_COMPLETED).map(String::as_str),
            Some("2026-01-01T00:00:00Z")
        );
    }
}
