//! Roster Core - Core types, device registry and persistence
//!
//! This crate provides the foundational types for the Roster system:
//! - Device records for every IPv4 address seen on the local network
//! - Scan options shared by the orchestrator and the daemon configuration
//! - The device registry (the authoritative roster) with its reconciliation rules
//! - Persistence abstraction with a JSON file implementation

pub mod device;
pub mod options;
pub mod registry;
pub mod store;

pub use device::{Device, UNKNOWN};
pub use options::{OptionsError, ScanOptions, MAX_SCAN_INTERVAL_MINUTES};
pub use registry::DeviceRegistry;
pub use store::{JsonFileStore, MemoryStore, RosterStore, Settings, StoreError};
