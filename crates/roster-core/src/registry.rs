//! Device registry - the authoritative roster
//!
//! The registry is the sole owner of device records. Every operation takes the
//! lock for its own duration only and hands out copies, so callers can never
//! hold a reference into the live map across an await point.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::device::Device;

/// Address-keyed roster of every device seen this session
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Mutex<BTreeMap<Ipv4Addr, Device>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load persisted devices. Duplicate addresses keep the most recently seen record.
    pub async fn hydrate(&self, devices: Vec<Device>) -> usize {
        let mut map = self.devices.lock().await;
        for device in devices {
            match map.get(&device.address) {
                Some(existing) if existing.last_seen >= device.last_seen => {}
                _ => {
                    map.insert(device.address, device);
                }
            }
        }
        debug!(count = map.len(), "Registry hydrated");
        map.len()
    }

    /// Copy of every device, ordered by address
    pub async fn snapshot(&self) -> Vec<Device> {
        self.devices.lock().await.values().cloned().collect()
    }

    pub async fn find_by_address(&self, address: Ipv4Addr) -> Option<Device> {
        self.devices.lock().await.get(&address).cloned()
    }

    pub async fn len(&self) -> usize {
        self.devices.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.lock().await.is_empty()
    }

    /// Insert a new device or merge a probe result into the existing record.
    /// Returns the stored record and whether it was newly inserted.
    pub async fn upsert(&self, device: Device) -> (Device, bool) {
        let mut map = self.devices.lock().await;
        match map.get_mut(&device.address) {
            Some(existing) => {
                existing.merge_probe(&device);
                trace!(ip = %device.address, "Updated device");
                (existing.clone(), false)
            }
            None => {
                trace!(ip = %device.address, "Inserted device");
                map.insert(device.address, device.clone());
                (device, true)
            }
        }
    }

    /// Flag every device offline ahead of a sweep. Returns how many were online.
    pub async fn mark_all_offline(&self) -> usize {
        let mut map = self.devices.lock().await;
        let mut was_online = 0;
        for device in map.values_mut() {
            if device.is_online {
                was_online += 1;
            }
            device.mark_offline();
        }
        was_online
    }

    /// Flag a single known device offline. Unknown addresses are ignored.
    pub async fn mark_offline(&self, address: Ipv4Addr) -> Option<Device> {
        let mut map = self.devices.lock().await;
        map.get_mut(&address).map(|device| {
            device.mark_offline();
            device.clone()
        })
    }

    /// Remove a device from the roster
    pub async fn remove(&self, address: Ipv4Addr) -> Option<Device> {
        self.devices.lock().await.remove(&address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_merges() {
        let registry = DeviceRegistry::new();
        let mut first = Device::online(ip(5), Duration::from_millis(4));
        first.mac_address = "aa:aa:aa:aa:aa:aa".to_string();
        let (_, inserted) = registry.upsert(first).await;
        assert!(inserted);

        let second = Device::online(ip(5), Duration::from_millis(9));
        let (merged, inserted) = registry.upsert(second).await;
        assert!(!inserted);

        assert_eq!(registry.len().await, 1);
        assert_eq!(merged.mac_address, "aa:aa:aa:aa:aa:aa");
        assert_eq!(merged.response_time, Duration::from_millis(9));
    }

    #[tokio::test]
    async fn test_mark_all_offline_keeps_devices() {
        let registry = DeviceRegistry::new();
        registry.upsert(Device::online(ip(1), Duration::from_millis(1))).await;
        registry.upsert(Device::online(ip(2), Duration::from_millis(1))).await;
        registry.upsert(Device::new(ip(3))).await;

        assert_eq!(registry.mark_all_offline().await, 2);

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot
            .iter()
            .all(|d| !d.is_online && d.response_time == Duration::ZERO));
    }

    #[tokio::test]
    async fn test_mark_offline_ignores_unknown_address() {
        let registry = DeviceRegistry::new();
        assert!(registry.mark_offline(ip(9)).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_snapshot_is_a_copy() {
        let registry = DeviceRegistry::new();
        registry.upsert(Device::online(ip(1), Duration::from_millis(1))).await;

        let mut snapshot = registry.snapshot().await;
        snapshot[0].name = "changed".to_string();

        let stored = registry.find_by_address(ip(1)).await.unwrap();
        assert_eq!(stored.name, "DEVICE_1");
    }

    #[tokio::test]
    async fn test_hydrate_keeps_latest_duplicate() {
        let registry = DeviceRegistry::new();
        let older = Device::new(ip(7));
        let mut newer = older.clone();
        newer.name = "nas".to_string();
        newer.last_seen = older.last_seen + ChronoDuration::minutes(5);

        assert_eq!(registry.hydrate(vec![newer, older]).await, 1);
        assert_eq!(registry.find_by_address(ip(7)).await.unwrap().name, "nas");
    }

    #[tokio::test]
    async fn test_remove() {
        let registry = DeviceRegistry::new();
        registry.upsert(Device::new(ip(4))).await;
        assert!(registry.remove(ip(4)).await.is_some());
        assert!(registry.remove(ip(4)).await.is_none());
    }
}
