//! ARP table lookups for MAC address resolution

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Linux kernel ARP cache
const PROC_NET_ARP: &str = "/proc/net/arp";

/// Resolves the hardware address of a host on the local segment
#[async_trait]
pub trait MacResolver: Send + Sync {
    /// Returns `None` when the address is not resolvable. Never fails.
    async fn resolve_mac(&self, ip: Ipv4Addr) -> Option<String>;
}

/// ARP table entry
#[derive(Debug, Clone)]
pub struct ArpEntry {
    pub ip: Ipv4Addr,
    pub mac: String,
    pub interface: String,
    pub state: ArpState,
}

impl ArpEntry {
    /// Entry carries a usable hardware address
    pub fn is_resolved(&self) -> bool {
        !self.mac.is_empty()
            && self.mac != "00:00:00:00:00:00"
            && !matches!(self.state, ArpState::Failed | ArpState::Incomplete)
    }
}

/// ARP entry state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpState {
    Reachable,
    Stale,
    Delay,
    Probe,
    Failed,
    Incomplete,
    Permanent,
    Unknown,
}

/// MAC resolver backed by the system ARP cache.
///
/// Queries `ip neigh show` first and falls back to `/proc/net/arp`. A probe
/// that just received an echo reply leaves a fresh entry in the cache, so no
/// ARP request of our own is needed.
#[derive(Debug, Clone)]
pub struct ArpTableResolver {
    timeout: Duration,
}

impl ArpTableResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ArpTableResolver {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl MacResolver for ArpTableResolver {
    async fn resolve_mac(&self, ip: Ipv4Addr) -> Option<String> {
        let entries = match timeout(self.timeout, get_arp_table()).await {
            Ok(Ok(entries)) => entries,
            Ok(Err(e)) => {
                debug!(ip = %ip, error = %e, "ARP table unavailable");
                return None;
            }
            Err(_) => {
                debug!(ip = %ip, "ARP table lookup timed out");
                return None;
            }
        };

        let mac = entries
            .into_iter()
            .find(|entry| entry.ip == ip && entry.is_resolved())
            .map(|entry| entry.mac);
        trace!(ip = %ip, mac = ?mac, "ARP lookup");
        mac
    }
}

/// Get current ARP table entries
pub async fn get_arp_table() -> Result<Vec<ArpEntry>> {
    match read_ip_neigh().await {
        Ok(entries) => Ok(entries),
        Err(e) => {
            trace!(error = %e, "ip neigh failed, reading {}", PROC_NET_ARP);
            read_proc_net_arp().await
        }
    }
}

async fn read_ip_neigh() -> Result<Vec<ArpEntry>> {
    let output = Command::new("ip")
        .args(["-4", "neigh", "show"])
        .output()
        .await
        .context("Failed to run ip neigh")?;

    if !output.status.success() {
        anyhow::bail!(
            "Failed to get ARP table: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let entries: Vec<ArpEntry> = stdout.lines().filter_map(parse_ip_neigh_line).collect();
    trace!(entries = entries.len(), "Read neighbour table");
    Ok(entries)
}

async fn read_proc_net_arp() -> Result<Vec<ArpEntry>> {
    let content = tokio::fs::read_to_string(PROC_NET_ARP)
        .await
        .with_context(|| format!("Failed to read {}", PROC_NET_ARP))?;
    // First line is the column header
    Ok(content
        .lines()
        .skip(1)
        .filter_map(parse_proc_net_arp_line)
        .collect())
}

/// Parse a line from `ip neigh show` output
fn parse_ip_neigh_line(line: &str) -> Option<ArpEntry> {
    // Format: "192.168.1.1 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE"
    let parts: Vec<&str> = line.split_whitespace().collect();

    if parts.len() < 4 {
        return None;
    }

    let ip = Ipv4Addr::from_str(parts[0]).ok()?;

    let dev_idx = parts.iter().position(|&p| p == "dev")?;
    let lladdr_idx = parts.iter().position(|&p| p == "lladdr");

    if dev_idx + 1 >= parts.len() {
        return None;
    }

    let interface = parts[dev_idx + 1].to_string();

    // MAC might not be present for INCOMPLETE entries
    let mac = lladdr_idx
        .and_then(|idx| parts.get(idx + 1))
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    let state = parts
        .last()
        .map(|s| parse_arp_state(s))
        .unwrap_or(ArpState::Unknown);

    Some(ArpEntry {
        ip,
        mac,
        interface,
        state,
    })
}

/// Parse a line from `/proc/net/arp`
fn parse_proc_net_arp_line(line: &str) -> Option<ArpEntry> {
    // Format: "192.168.1.1  0x1  0x2  aa:bb:cc:dd:ee:ff  *  eth0"
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 6 {
        return None;
    }

    let ip = Ipv4Addr::from_str(parts[0]).ok()?;
    let flags = u32::from_str_radix(parts[2].trim_start_matches("0x"), 16).ok()?;
    let state = match flags {
        0 => ArpState::Incomplete,
        f if f & 0x4 != 0 => ArpState::Permanent,
        f if f & 0x2 != 0 => ArpState::Reachable,
        _ => ArpState::Unknown,
    };

    Some(ArpEntry {
        ip,
        mac: parts[3].to_lowercase(),
        interface: parts[5].to_string(),
        state,
    })
}

/// Parse ARP state string
fn parse_arp_state(s: &str) -> ArpState {
    match s.to_uppercase().as_str() {
        "REACHABLE" => ArpState::Reachable,
        "STALE" => ArpState::Stale,
        "DELAY" => ArpState::Delay,
        "PROBE" => ArpState::Probe,
        "FAILED" => ArpState::Failed,
        "INCOMPLETE" => ArpState::Incomplete,
        "PERMANENT" => ArpState::Permanent,
        _ => ArpState::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ip_neigh_line_reachable() {
        let line = "192.168.1.100 dev eth0 lladdr AA:BB:CC:DD:EE:FF REACHABLE";
        let entry = parse_ip_neigh_line(line).unwrap();
        assert_eq!(entry.ip, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(entry.mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(entry.interface, "eth0");
        assert_eq!(entry.state, ArpState::Reachable);
        assert!(entry.is_resolved());
    }

    #[test]
    fn test_parse_ip_neigh_line_stale() {
        let line = "192.168.1.100 dev eth0 lladdr aa:bb:cc:dd:ee:ff STALE";
        let entry = parse_ip_neigh_line(line).unwrap();
        assert_eq!(entry.state, ArpState::Stale);
        assert!(entry.is_resolved());
    }

    #[test]
    fn test_parse_incomplete_line() {
        let line = "192.168.1.100 dev eth0 INCOMPLETE";
        let entry = parse_ip_neigh_line(line).unwrap();
        assert_eq!(entry.ip, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(entry.mac, "");
        assert_eq!(entry.state, ArpState::Incomplete);
        assert!(!entry.is_resolved());
    }

    #[test]
    fn test_parse_too_short() {
        assert!(parse_ip_neigh_line("192.168.1.100 dev").is_none());
    }

    #[test]
    fn test_parse_proc_net_arp() {
        let line = "192.168.1.1      0x1         0x2         a4:91:b1:00:11:22     *        wlan0";
        let entry = parse_proc_net_arp_line(line).unwrap();
        assert_eq!(entry.ip, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(entry.mac, "a4:91:b1:00:11:22");
        assert_eq!(entry.interface, "wlan0");
        assert_eq!(entry.state, ArpState::Reachable);
    }

    #[test]
    fn test_parse_proc_net_arp_incomplete() {
        let line = "192.168.1.77     0x1         0x0         00:00:00:00:00:00     *        wlan0";
        let entry = parse_proc_net_arp_line(line).unwrap();
        assert_eq!(entry.state, ArpState::Incomplete);
        assert!(!entry.is_resolved());
    }

    #[test]
    fn test_parse_proc_net_arp_header_is_skipped() {
        let header = "IP address       HW type     Flags       HW address            Mask     Device";
        assert!(parse_proc_net_arp_line(header).is_none());
    }
}
