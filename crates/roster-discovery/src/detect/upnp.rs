//! UPnP/SSDP discovery based classification
//!
//! An SSDP `M-SEARCH` is multicast on the local segment and every reply is
//! recorded by origin address. When the target answered, its device
//! description document is fetched from the advertised `LOCATION` and a label
//! is derived from the manufacturer, model and device type it declares.
//!
//! Searches are shared: concurrent classifications wait for the search in
//! progress and reuse its responders until they are older than the search
//! TTL. Labels are cached per address for the lifetime of the detector.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, trace};

use super::Detector;

const SSDP_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
const SSDP_PORT: u16 = 1900;

/// Label used when a host answers SSDP but describes nothing useful
pub const GENERIC_LABEL: &str = "UPnP Device";

/// Responders from the last search, by origin address
struct SearchResult {
    finished: Instant,
    locations: HashMap<Ipv4Addr, String>,
}

pub struct UpnpDetector {
    priority: i32,
    search_window: Duration,
    search_ttl: Duration,
    client: reqwest::Client,
    search: Mutex<Option<SearchResult>>,
    labels: Mutex<HashMap<Ipv4Addr, Option<String>>>,
}

impl UpnpDetector {
    /// `search_window` is how long replies are collected after each search
    pub fn new(priority: i32, search_window: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(search_window.max(Duration::from_secs(1)))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            priority,
            search_window,
            search_ttl: Duration::from_secs(60),
            client,
            search: Mutex::new(None),
            labels: Mutex::new(HashMap::new()),
        })
    }

    /// Location advertised by `ip`, searching again if the last search is stale
    async fn location_for(&self, ip: Ipv4Addr) -> Option<String> {
        let mut search = self.search.lock().await;
        let fresh = search
            .as_ref()
            .is_some_and(|s| s.finished.elapsed() < self.search_ttl);

        if !fresh {
            match self.run_search().await {
                Ok(locations) => {
                    debug!(responders = locations.len(), "SSDP search complete");
                    *search = Some(SearchResult {
                        finished: Instant::now(),
                        locations,
                    });
                }
                Err(e) => {
                    debug!(error = %e, "SSDP search failed");
                    return None;
                }
            }
        }

        search.as_ref()?.locations.get(&ip).cloned()
    }

    async fn run_search(&self) -> Result<HashMap<Ipv4Addr, String>> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("Failed to bind SSDP socket")?;
        let mx = self.search_window.as_secs().clamp(1, 5);
        let request = format!(
            "M-SEARCH * HTTP/1.1\r\n\
             HOST: {}:{}\r\n\
             MAN: \"ssdp:discover\"\r\n\
             MX: {}\r\n\
             ST: upnp:rootdevice\r\n\r\n",
            SSDP_ADDR, SSDP_PORT, mx
        );
        socket
            .send_to(request.as_bytes(), SocketAddr::from((SSDP_ADDR, SSDP_PORT)))
            .await
            .context("Failed to send M-SEARCH")?;

        let deadline = tokio::time::Instant::now() + self.search_window;
        let mut locations = HashMap::new();
        let mut buf = vec![0u8; 2048];

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, socket.recv_from(&mut buf)).await {
                Ok(Ok((len, SocketAddr::V4(origin)))) => {
                    let response = String::from_utf8_lossy(&buf[..len]);
                    if let Some(location) = parse_location(&response) {
                        trace!(origin = %origin.ip(), location = %location, "SSDP reply");
                        locations.entry(*origin.ip()).or_insert(location);
                    }
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    debug!(error = %e, "SSDP receive failed");
                    break;
                }
                Err(_) => break,
            }
        }

        Ok(locations)
    }

    async fn describe(&self, location: &str) -> Result<String> {
        let body = self
            .client
            .get(location)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", location))?
            .error_for_status()?
            .text()
            .await?;
        Ok(parse_description(&body)
            .map(|d| d.label())
            .unwrap_or_else(|| GENERIC_LABEL.to_string()))
    }
}

#[async_trait]
impl Detector for UpnpDetector {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn name(&self) -> &str {
        "upnp"
    }

    async fn classify(&self, ip: Ipv4Addr) -> Option<String> {
        if let Some(cached) = self.labels.lock().await.get(&ip) {
            return cached.clone();
        }

        let label = match self.location_for(ip).await {
            Some(location) => match self.describe(&location).await {
                Ok(label) => Some(label),
                Err(e) => {
                    debug!(ip = %ip, error = %e, "UPnP description unavailable");
                    Some(GENERIC_LABEL.to_string())
                }
            },
            None => None,
        };

        self.labels.lock().await.insert(ip, label.clone());
        label
    }
}

/// `LOCATION` header of an SSDP reply
fn parse_location(response: &str) -> Option<String> {
    response.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("location") {
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        } else {
            None
        }
    })
}

#[derive(Debug, Deserialize)]
struct DescriptionRoot {
    device: Option<DeviceDescription>,
}

/// The parts of a UPnP device description used for labelling
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescription {
    pub device_type: Option<String>,
    pub friendly_name: Option<String>,
    pub manufacturer: Option<String>,
    pub model_name: Option<String>,
}

fn parse_description(xml: &str) -> Option<DeviceDescription> {
    quick_xml::de::from_str::<DescriptionRoot>(xml).ok()?.device
}

impl DeviceDescription {
    /// e.g. "Media Renderer (Sonos One)"
    pub fn label(&self) -> String {
        let vendor = self
            .manufacturer
            .as_deref()
            .and_then(|m| m.split(',').next())
            .map(str::trim)
            .filter(|m| !m.is_empty());
        let model = self
            .model_name
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty());

        let vendor_model = match (vendor, model) {
            (Some(v), Some(m)) if m.to_lowercase().starts_with(&v.to_lowercase()) => {
                Some(m.to_string())
            }
            (Some(v), Some(m)) => Some(format!("{} {}", v, m)),
            (Some(v), None) => Some(v.to_string()),
            (None, Some(m)) => Some(m.to_string()),
            (None, None) => None,
        };

        let kind = self.device_type.as_deref().and_then(device_kind);

        match (kind, vendor_model) {
            (Some(kind), Some(vm)) => format!("{} ({})", kind, vm),
            (Some(kind), None) => kind,
            (None, Some(vm)) => vm,
            (None, None) => GENERIC_LABEL.to_string(),
        }
    }
}

/// Human readable form of a device type URN
fn device_kind(urn: &str) -> Option<String> {
    // urn:schemas-upnp-org:device:MediaRenderer:1
    let name = urn.split(':').nth(3)?;
    let kind = match name {
        "InternetGatewayDevice" | "WANDevice" | "WANConnectionDevice" => "Router".to_string(),
        "Basic" | "" => return None,
        other => split_camel_case(other),
    };
    Some(kind)
}

fn split_camel_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let mut prev_lower = false;
    for c in s.chars() {
        if c.is_uppercase() && prev_lower {
            out.push(' ');
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SONOS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:ZonePlayer:1</deviceType>
    <friendlyName>192.168.1.31 - Sonos One</friendlyName>
    <manufacturer>Sonos, Inc.</manufacturer>
    <modelName>Sonos One</modelName>
    <serviceList></serviceList>
  </device>
</root>"#;

    #[test]
    fn test_parse_location() {
        let response = "HTTP/1.1 200 OK\r\n\
                        CACHE-CONTROL: max-age=1800\r\n\
                        Location: http://192.168.1.1:5000/rootDesc.xml\r\n\
                        ST: upnp:rootdevice\r\n\r\n";
        assert_eq!(
            parse_location(response).as_deref(),
            Some("http://192.168.1.1:5000/rootDesc.xml")
        );
        assert_eq!(parse_location("HTTP/1.1 200 OK\r\n\r\n"), None);
    }

    #[test]
    fn test_label_from_description() {
        let description = parse_description(SONOS).unwrap();
        assert_eq!(description.label(), "Zone Player (Sonos One)");
    }

    #[test]
    fn test_router_label() {
        let description = DeviceDescription {
            device_type: Some("urn:schemas-upnp-org:device:InternetGatewayDevice:1".to_string()),
            manufacturer: Some("NETGEAR".to_string()),
            model_name: Some("R7000".to_string()),
            ..Default::default()
        };
        assert_eq!(description.label(), "Router (NETGEAR R7000)");
    }

    #[test]
    fn test_generic_label_without_hints() {
        let description = DeviceDescription {
            device_type: Some("urn:schemas-upnp-org:device:Basic:1".to_string()),
            ..Default::default()
        };
        assert_eq!(description.label(), GENERIC_LABEL);
    }

    #[test]
    fn test_split_camel_case() {
        assert_eq!(split_camel_case("MediaRenderer"), "Media Renderer");
        assert_eq!(split_camel_case("TV"), "TV");
    }

    #[test]
    fn test_unparseable_description() {
        assert!(parse_description("<html>nope</html>").is_none());
    }
}
