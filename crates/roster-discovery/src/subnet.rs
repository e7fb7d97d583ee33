//! Subnet prefixes to sweep
//!
//! A prefix is the first three octets of a /24 network, e.g. `"192.168.1"`.
//! The sweep appends each configured host octet to it.

use async_trait::async_trait;
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use std::net::Ipv4Addr;
use thiserror::Error;
use tracing::{debug, trace};

/// Interface name prefixes that never carry the LAN we want to watch
const IGNORED_INTERFACES: &[&str] = &["lo", "docker", "veth", "br-", "virbr", "tun", "tap"];

#[derive(Error, Debug)]
pub enum SubnetError {
    #[error("Invalid subnet prefix {0:?}, expected three octets like \"192.168.1\"")]
    InvalidPrefix(String),
    #[error("Failed to enumerate network interfaces: {0}")]
    Interfaces(String),
}

/// Source of the subnet prefixes swept by the scanner
#[async_trait]
pub trait SubnetProvider: Send + Sync {
    async fn subnets(&self) -> Result<Vec<String>, SubnetError>;
}

/// Fixed list of prefixes, typically from configuration
#[derive(Debug, Clone)]
pub struct StaticSubnetProvider {
    prefixes: Vec<String>,
}

impl StaticSubnetProvider {
    pub fn new(prefixes: Vec<String>) -> Result<Self, SubnetError> {
        for prefix in &prefixes {
            parse_prefix(prefix)?;
        }
        Ok(Self { prefixes })
    }
}

#[async_trait]
impl SubnetProvider for StaticSubnetProvider {
    async fn subnets(&self) -> Result<Vec<String>, SubnetError> {
        Ok(self.prefixes.clone())
    }
}

/// Prefixes of every active IPv4 interface on this host
#[derive(Debug, Clone, Default)]
pub struct InterfaceSubnetProvider;

#[async_trait]
impl SubnetProvider for InterfaceSubnetProvider {
    async fn subnets(&self) -> Result<Vec<String>, SubnetError> {
        let interfaces =
            NetworkInterface::show().map_err(|e| SubnetError::Interfaces(e.to_string()))?;

        let mut prefixes = Vec::new();
        for iface in interfaces {
            if IGNORED_INTERFACES
                .iter()
                .any(|ignored| iface.name.starts_with(ignored))
            {
                trace!(interface = %iface.name, "Skipping interface");
                continue;
            }
            for addr in &iface.addr {
                if let Addr::V4(v4) = addr {
                    if v4.ip.is_loopback() || v4.ip.is_link_local() || v4.ip.is_unspecified() {
                        continue;
                    }
                    let prefix = prefix_of(v4.ip);
                    if !prefixes.contains(&prefix) {
                        debug!(
                            interface = %iface.name,
                            ip = %v4.ip,
                            prefix = %prefix,
                            "Detected subnet"
                        );
                        prefixes.push(prefix);
                    }
                }
            }
        }
        Ok(prefixes)
    }
}

/// The /24 prefix an address belongs to
pub fn prefix_of(ip: Ipv4Addr) -> String {
    let [a, b, c, _] = ip.octets();
    format!("{}.{}.{}", a, b, c)
}

/// Parse a three-octet prefix
pub fn parse_prefix(prefix: &str) -> Result<[u8; 3], SubnetError> {
    let invalid = || SubnetError::InvalidPrefix(prefix.to_string());
    let mut octets = [0u8; 3];
    let mut parts = prefix.trim().split('.');
    for octet in octets.iter_mut() {
        *octet = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
    }
    if parts.next().is_some() {
        return Err(invalid());
    }
    Ok(octets)
}

/// Build the host address `prefix.octet`
pub fn host_address(prefix: [u8; 3], octet: u8) -> Ipv4Addr {
    Ipv4Addr::new(prefix[0], prefix[1], prefix[2], octet)
}
