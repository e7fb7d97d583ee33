//! Classification by well-known open TCP ports

use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::trace;

use super::Detector;

/// Ports that identify a device class, most specific first
pub const DEFAULT_PORT_RULES: &[(u16, &str)] = &[
    (9100, "Printer"),
    (631, "Printer"),
    (8009, "Chromecast"),
    (62078, "Apple Device"),
    (554, "IP Camera"),
    (1883, "IoT Hub"),
    (32400, "Media Server"),
    (445, "Windows PC"),
    (3389, "Windows PC"),
    (5000, "NAS"),
    (53, "Router"),
];

/// Connects to every rule port in parallel and labels the host after the
/// highest ranked port that accepted.
#[derive(Debug, Clone)]
pub struct PortDetector {
    priority: i32,
    timeout: Duration,
    rules: Vec<(u16, String)>,
}

impl PortDetector {
    pub fn new(priority: i32, timeout: Duration) -> Self {
        Self::with_rules(
            priority,
            timeout,
            DEFAULT_PORT_RULES
                .iter()
                .map(|(port, label)| (*port, label.to_string()))
                .collect(),
        )
    }

    pub fn with_rules(priority: i32, timeout: Duration, rules: Vec<(u16, String)>) -> Self {
        Self {
            priority,
            timeout,
            rules,
        }
    }
}

#[async_trait]
impl Detector for PortDetector {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn name(&self) -> &str {
        "ports"
    }

    async fn classify(&self, ip: Ipv4Addr) -> Option<String> {
        let mut tasks = JoinSet::new();
        for (rank, (port, _)) in self.rules.iter().enumerate() {
            let addr = SocketAddr::from((ip, *port));
            let connect_timeout = self.timeout;
            tasks.spawn(async move {
                match timeout(connect_timeout, TcpStream::connect(addr)).await {
                    Ok(Ok(_)) => Some(rank),
                    _ => None,
                }
            });
        }

        let mut best: Option<usize> = None;
        while let Some(result) = tasks.join_next().await {
            if let Ok(Some(rank)) = result {
                trace!(ip = %ip, port = self.rules[rank].0, "Port open");
                best = Some(best.map_or(rank, |b| b.min(rank)));
            }
        }
        best.map(|rank| self.rules[rank].1.clone())
    }
}
