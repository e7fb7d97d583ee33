//! Host reachability and name lookups used by each per-address probe

use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Extra time granted to the ping process on top of its own reply timeout
const PING_GRACE: Duration = Duration::from_millis(500);

/// Sends an ICMP echo to a host
#[async_trait]
pub trait Pinger: Send + Sync {
    /// Round-trip time on reply, `None` on timeout or any failure
    async fn ping(&self, ip: Ipv4Addr, timeout: Duration) -> Option<Duration>;
}

/// Reverse name resolution
#[async_trait]
pub trait HostnameResolver: Send + Sync {
    async fn resolve_hostname(&self, ip: Ipv4Addr) -> Option<String>;
}

/// Pinger that shells out to the system `ping` binary (no raw socket privileges needed)
#[derive(Debug, Clone, Default)]
pub struct SystemPinger;

#[async_trait]
impl Pinger for SystemPinger {
    async fn ping(&self, ip: Ipv4Addr, reply_timeout: Duration) -> Option<Duration> {
        // -W takes whole seconds on most ping builds
        let wait_secs = reply_timeout.as_secs_f64().ceil().max(1.0) as u64;
        let started = Instant::now();

        let child = Command::new("ping")
            .args(["-n", "-c", "1", "-W", &wait_secs.to_string(), &ip.to_string()])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match timeout(reply_timeout + PING_GRACE, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                debug!(ip = %ip, error = %e, "Failed to run ping");
                return None;
            }
            Err(_) => {
                trace!(ip = %ip, "Ping timed out");
                return None;
            }
        };

        if !output.status.success() {
            trace!(ip = %ip, "No echo reply");
            return None;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Some(parse_round_trip(&stdout).unwrap_or_else(|| started.elapsed()))
    }
}

/// Extract the round-trip time from ping output ("time=1.23 ms")
fn parse_round_trip(output: &str) -> Option<Duration> {
    let start = output.find("time=").or_else(|| output.find("time<"))? + 5;
    let rest = &output[start..];
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    let millis: f64 = rest[..end].parse().ok()?;
    Some(Duration::from_micros((millis * 1000.0).round() as u64))
}

/// Reverse DNS through the system resolver
#[derive(Debug, Clone)]
pub struct SystemHostnameResolver {
    timeout: Duration,
}

impl SystemHostnameResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemHostnameResolver {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl HostnameResolver for SystemHostnameResolver {
    async fn resolve_hostname(&self, ip: Ipv4Addr) -> Option<String> {
        let addr = IpAddr::V4(ip);
        // getnameinfo blocks, keep it off the runtime threads
        let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&addr));

        match timeout(self.timeout, lookup).await {
            Ok(Ok(Ok(name))) => normalize_hostname(&name, ip),
            Ok(Ok(Err(e))) => {
                trace!(ip = %ip, error = %e, "Reverse lookup failed");
                None
            }
            Ok(Err(e)) => {
                debug!(ip = %ip, error = %e, "Reverse lookup task failed");
                None
            }
            Err(_) => {
                trace!(ip = %ip, "Reverse lookup timed out");
                None
            }
        }
    }
}

/// Drop numeric answers and trailing dots
fn normalize_hostname(name: &str, ip: Ipv4Addr) -> Option<String> {
    let name = name.trim().trim_end_matches('.');
    if name.is_empty() || name.parse::<IpAddr>().is_ok() || name == ip.to_string() {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip_linux() {
        let output = "PING 192.168.1.1 (192.168.1.1) 56(84) bytes of data.\n\
                      64 bytes from 192.168.1.1: icmp_seq=1 ttl=64 time=1.27 ms\n";
        assert_eq!(parse_round_trip(output), Some(Duration::from_micros(1270)));
    }

    #[test]
    fn test_parse_round_trip_sub_millisecond() {
        let output = "Reply from 10.0.0.1: bytes=32 time<1ms TTL=128";
        assert_eq!(parse_round_trip(output), Some(Duration::from_millis(1)));
    }

    #[test]
    fn test_parse_round_trip_missing() {
        assert_eq!(parse_round_trip("Request timeout for icmp_seq 0"), None);
    }

    #[test]
    fn test_normalize_hostname() {
        let ip = Ipv4Addr::new(192, 168, 1, 20);
        assert_eq!(
            normalize_hostname("nas.lan.", ip),
            Some("nas.lan".to_string())
        );
        assert_eq!(normalize_hostname("192.168.1.20", ip), None);
        assert_eq!(normalize_hostname("", ip), None);
    }
}
