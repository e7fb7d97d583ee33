//! Roster Discovery - Local network sweeping and device identification
//!
//! This crate provides:
//! - The scan orchestrator (continuous scheduling, bounded concurrent sweeps)
//! - ICMP reachability and reverse DNS probes
//! - MAC resolution from the kernel neighbour table
//! - A priority ordered chain of device type detectors (UPnP, open ports, SSH)
//! - Broadcast event channels for progress, device and schedule updates

pub mod arp;
pub mod detect;
pub mod events;
pub mod probe;
pub mod scanner;
pub mod subnet;

pub use arp::{ArpTableResolver, MacResolver};
pub use detect::{DetectionChain, Detector, PortDetector, SshBannerDetector, UpnpDetector};
pub use events::{DeviceEvent, EventHub, ProgressEvent, ProgressLevel, ScheduleEvent};
pub use probe::{HostnameResolver, Pinger, SystemHostnameResolver, SystemPinger};
pub use scanner::{NetworkScanner, ScanBackends, ScanState, SweepError};
pub use subnet::{InterfaceSubnetProvider, StaticSubnetProvider, SubnetError, SubnetProvider};
