//! Device classification
//!
//! Detectors are tried in descending priority and the first non-empty label
//! wins. Cheap, specific detectors should register a high priority so that
//! broad, expensive ones (broadcast discovery) only run when nothing else
//! matched.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, trace};

pub mod port;
pub mod ssh;
pub mod upnp;

pub use port::PortDetector;
pub use ssh::SshBannerDetector;
pub use upnp::UpnpDetector;

/// A classifier that may recognise what kind of device lives at an address.
///
/// Implementations enforce their own timeouts and report any failure as
/// `None`.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Higher runs first
    fn priority(&self) -> i32;

    fn name(&self) -> &str;

    async fn classify(&self, ip: Ipv4Addr) -> Option<String>;
}

/// Priority-ordered set of detectors, built once and shared by every sweep
#[derive(Clone, Default)]
pub struct DetectionChain {
    detectors: Vec<Arc<dyn Detector>>,
}

impl DetectionChain {
    /// Order is fixed here; detectors with equal priority keep insertion order
    pub fn new(mut detectors: Vec<Arc<dyn Detector>>) -> Self {
        detectors.sort_by_key(|d| std::cmp::Reverse(d.priority()));
        debug!(
            detectors = ?detectors.iter().map(|d| d.name().to_string()).collect::<Vec<_>>(),
            "Detection chain built"
        );
        Self { detectors }
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    /// Detector names in the order they are tried
    pub fn names(&self) -> Vec<&str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    /// Label from the first detector that recognises the host
    pub async fn classify_device(&self, ip: Ipv4Addr) -> Option<String> {
        for detector in &self.detectors {
            match detector.classify(ip).await {
                Some(label) if !label.trim().is_empty() => {
                    debug!(
                        ip = %ip,
                        detector = detector.name(),
                        label = %label,
                        "Device classified"
                    );
                    return Some(label.trim().to_string());
                }
                _ => trace!(ip = %ip, detector = detector.name(), "No match"),
            }
        }
        None
    }
}

impl std::fmt::Debug for DetectionChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionChain")
            .field("detectors", &self.names())
            .finish()
    }
}
