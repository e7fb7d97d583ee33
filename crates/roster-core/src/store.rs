//! Roster persistence
//!
//! The core only needs to load and save the device list and a small string
//! settings map. [`JsonFileStore`] keeps both as pretty-printed JSON files;
//! [`MemoryStore`] keeps them in memory for tests and one-shot runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::device::Device;

/// Key/value settings persisted next to the roster
pub type Settings = HashMap<String, String>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Storage backend for the roster and its settings
#[async_trait]
pub trait RosterStore: Send + Sync {
    async fn load_devices(&self) -> Result<Vec<Device>, StoreError>;
    async fn save_devices(&self, devices: &[Device]) -> Result<(), StoreError>;
    async fn load_settings(&self) -> Result<Settings, StoreError>;
    async fn save_settings(&self, settings: &Settings) -> Result<(), StoreError>;
}

/// JSON files on disk. A missing file loads as empty.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    devices_path: PathBuf,
    settings_path: PathBuf,
}

impl JsonFileStore {
    pub fn new(devices_path: impl Into<PathBuf>, settings_path: impl Into<PathBuf>) -> Self {
        Self {
            devices_path: devices_path.into(),
            settings_path: settings_path.into(),
        }
    }

    pub fn devices_path(&self) -> &Path {
        &self.devices_path
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    async fn read_json<T>(path: &Path) -> Result<Option<T>, StoreError>
    where
        T: serde::de::DeserializeOwned,
    {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StoreError::Json {
                path: path.to_path_buf(),
                source,
            })
    }

    async fn write_json<T>(path: &Path, value: &T) -> Result<(), StoreError>
    where
        T: serde::Serialize + ?Sized,
    {
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        let content = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
            }
        }
        tokio::fs::write(path, content).await.map_err(io_err)?;
        debug!(path = %path.display(), "Wrote roster file");
        Ok(())
    }
}

#[async_trait]
impl RosterStore for JsonFileStore {
    async fn load_devices(&self) -> Result<Vec<Device>, StoreError> {
        Ok(Self::read_json(&self.devices_path).await?.unwrap_or_default())
    }

    async fn save_devices(&self, devices: &[Device]) -> Result<(), StoreError> {
        Self::write_json(&self.devices_path, devices).await
    }

    async fn load_settings(&self) -> Result<Settings, StoreError> {
        Ok(Self::read_json(&self.settings_path).await?.unwrap_or_default())
    }

    async fn save_settings(&self, settings: &Settings) -> Result<(), StoreError> {
        Self::write_json(&self.settings_path, settings).await
    }
}

/// Volatile store
#[derive(Debug, Default)]
pub struct MemoryStore {
    devices: Mutex<Vec<Device>>,
    settings: Mutex<Settings>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RosterStore for MemoryStore {
    async fn load_devices(&self) -> Result<Vec<Device>, StoreError> {
        Ok(self.devices.lock().await.clone())
    }

    async fn save_devices(&self, devices: &[Device]) -> Result<(), StoreError> {
        *self.devices.lock().await = devices.to_vec();
        Ok(())
    }

    async fn load_settings(&self) -> Result<Settings, StoreError> {
        Ok(self.settings.lock().await.clone())
    }

    async fn save_settings(&self, settings: &Settings) -> Result<(), StoreError> {
        *self.settings.lock().await = settings.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_files_load_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(
            temp_dir.path().join("devices.json"),
            temp_dir.path().join("settings.json"),
        );
        assert!(store.load_devices().await.unwrap().is_empty());
        assert!(store.load_settings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_persists_devices_and_settings() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(
            temp_dir.path().join("state/devices.json"),
            temp_dir.path().join("state/settings.json"),
        );

        let mut device = Device::online(Ipv4Addr::new(192, 168, 0, 10), Duration::from_millis(3));
        device.mac_address = "de:ad:be:ef:00:01".to_string();
        store.save_devices(&[device.clone()]).await.unwrap();

        let mut settings = Settings::new();
        settings.insert("last_connected_ip".to_string(), "192.168.0.10".to_string());
        store.save_settings(&settings).await.unwrap();

        assert_eq!(store.load_devices().await.unwrap(), vec![device]);
        assert_eq!(store.load_settings().await.unwrap(), settings);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let devices_path = temp_dir.path().join("devices.json");
        std::fs::write(&devices_path, "not json").unwrap();

        let store = JsonFileStore::new(devices_path, temp_dir.path().join("settings.json"));
        assert!(matches!(
            store.load_devices().await,
            Err(StoreError::Json { .. })
        ));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        store
            .save_devices(&[Device::new(Ipv4Addr::new(10, 1, 1, 1))])
            .await
            .unwrap();
        assert_eq!(store.load_devices().await.unwrap().len(), 1);
    }
}
