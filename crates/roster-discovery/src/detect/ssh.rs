//! Classification from the SSH identification banner

use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

use super::Detector;

pub const SSH_PORT: u16 = 22;

/// Banner fragments and the label they imply, checked in order
const BANNER_HINTS: &[(&str, &str)] = &[
    ("raspbian", "Raspberry Pi"),
    ("ubuntu", "Linux (Ubuntu)"),
    ("debian", "Linux (Debian)"),
    ("freebsd", "FreeBSD Host"),
    ("for_windows", "Windows PC"),
    ("rosssh", "MikroTik Router"),
    ("cisco", "Network Equipment"),
    ("dropbear", "Embedded Linux"),
    ("openssh", "Linux/Unix Host"),
];

/// Reads the `SSH-2.0-...` line a server sends on connect
#[derive(Debug, Clone)]
pub struct SshBannerDetector {
    priority: i32,
    timeout: Duration,
    port: u16,
}

impl SshBannerDetector {
    pub fn new(priority: i32, timeout: Duration) -> Self {
        Self::with_port(priority, timeout, SSH_PORT)
    }

    pub fn with_port(priority: i32, timeout: Duration, port: u16) -> Self {
        Self {
            priority,
            timeout,
            port,
        }
    }

    async fn read_banner(&self, ip: Ipv4Addr) -> Option<String> {
        let addr = SocketAddr::from((ip, self.port));
        let stream = timeout(self.timeout, TcpStream::connect(addr))
            .await
            .ok()?
            .ok()?;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        // Servers may send other lines before the identification string
        for _ in 0..4 {
            line.clear();
            let read = timeout(self.timeout, reader.read_line(&mut line))
                .await
                .ok()?
                .ok()?;
            if read == 0 {
                return None;
            }
            if line.starts_with("SSH-") {
                return Some(line.trim().to_string());
            }
        }
        None
    }
}

/// Map an identification string to a device label
pub fn label_for_banner(banner: &str) -> Option<String> {
    if !banner.starts_with("SSH-") {
        return None;
    }
    let lower = banner.to_lowercase();
    let label = BANNER_HINTS
        .iter()
        .find(|(hint, _)| lower.contains(hint))
        .map(|(_, label)| *label)
        .unwrap_or("SSH Host");
    Some(label.to_string())
}

#[async_trait]
impl Detector for SshBannerDetector {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn name(&self) -> &str {
        "ssh"
    }

    async fn classify(&self, ip: Ipv4Addr) -> Option<String> {
        let banner = self.read_banner(ip).await?;
        trace!(ip = %ip, banner = %banner, "SSH banner");
        label_for_banner(&banner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_label_for_banner() {
        assert_eq!(
            label_for_banner("SSH-2.0-OpenSSH_8.9p1 Ubuntu-3ubuntu0.6").as_deref(),
            Some("Linux (Ubuntu)")
        );
        assert_eq!(
            label_for_banner("SSH-2.0-dropbear_2022.83").as_deref(),
            Some("Embedded Linux")
        );
        assert_eq!(
            label_for_banner("SSH-2.0-OpenSSH_for_Windows_8.1").as_deref(),
            Some("Windows PC")
        );
        assert_eq!(
            label_for_banner("SSH-2.0-Go").as_deref(),
            Some("SSH Host")
        );
        assert_eq!(label_for_banner("HTTP/1.1 400 Bad Request"), None);
    }

    #[tokio::test]
    async fn test_reads_banner_from_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let _ = socket
                    .write_all(b"SSH-2.0-OpenSSH_9.2p1 Debian-2+deb12u2\r\n")
                    .await;
            }
        });

        let detector = SshBannerDetector::with_port(8, Duration::from_millis(500), port);
        assert_eq!(
            detector.classify(Ipv4Addr::LOCALHOST).await.as_deref(),
            Some("Linux (Debian)")
        );
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let detector = SshBannerDetector::with_port(8, Duration::from_millis(100), port);
        assert_eq!(detector.classify(Ipv4Addr::LOCALHOST).await, None);
        drop(listener);
    }
}
