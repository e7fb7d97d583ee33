//! Network scanner - sweep orchestration and continuous scheduling
//!
//! Lifecycle:
//! - `Stopped`: no timer running, no sweep in flight
//! - `Armed`: continuous timer running between sweeps
//! - `Sweeping`: a full sweep is executing (possibly triggered by the timer)
//!
//! At most one full sweep runs at a time. Pausing is cooperative: a sweep in
//! flight stops dispatching new probes but lets dispatched ones finish.

use chrono::{DateTime, Utc};
use roster_core::{Device, DeviceRegistry, OptionsError, ScanOptions, UNKNOWN};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::arp::{ArpTableResolver, MacResolver};
use crate::detect::DetectionChain;
use crate::events::{DeviceEvent, EventHub, ScheduleEvent};
use crate::probe::{HostnameResolver, Pinger, SystemHostnameResolver, SystemPinger};
use crate::subnet::{host_address, parse_prefix, SubnetError, SubnetProvider};

/// Scanner lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    Stopped,
    Armed,
    Sweeping,
}

#[derive(Error, Debug)]
pub enum SweepError {
    #[error(transparent)]
    Subnets(#[from] SubnetError),
    #[error("No subnets to scan")]
    NoSubnets,
}

/// Network-facing collaborators used by every probe
#[derive(Clone)]
pub struct ScanBackends {
    pub subnets: Arc<dyn SubnetProvider>,
    pub pinger: Arc<dyn Pinger>,
    pub hostnames: Arc<dyn HostnameResolver>,
    pub macs: Arc<dyn MacResolver>,
}

impl ScanBackends {
    /// System ping, reverse DNS and ARP table with the given subnet source
    pub fn system(subnets: Arc<dyn SubnetProvider>) -> Self {
        Self {
            subnets,
            pinger: Arc::new(SystemPinger),
            hostnames: Arc::new(SystemHostnameResolver::default()),
            macs: Arc::new(ArpTableResolver::default()),
        }
    }
}

/// Outcome of one full sweep
#[derive(Debug, Clone, Copy, Default)]
struct SweepSummary {
    dispatched: usize,
    online: usize,
    paused: bool,
}

#[derive(Debug, Default)]
struct Schedule {
    next_scan: Option<DateTime<Utc>>,
    last_scan: Option<DateTime<Utc>>,
}

/// Background tasks of continuous mode. Dropping aborts them; a sweep they
/// started keeps running because it is spawned separately.
struct Timers {
    scheduler: JoinHandle<()>,
    countdown: JoinHandle<()>,
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.scheduler.abort();
        self.countdown.abort();
    }
}

/// Clears the sweeping flag however the sweep ends
struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Per-address probe work shared by sweep tasks and single-device scans
struct Prober {
    backends: ScanBackends,
    chain: DetectionChain,
    registry: Arc<DeviceRegistry>,
    events: EventHub,
}

impl Prober {
    /// Name, MAC and type for a host that just answered
    async fn identify(&self, ip: Ipv4Addr, response_time: Duration) -> Device {
        let (hostname, mac) = tokio::join!(
            self.backends.hostnames.resolve_hostname(ip),
            self.backends.macs.resolve_mac(ip)
        );
        let device_type = self.chain.classify_device(ip).await;

        let mut device = Device::online(ip, response_time);
        if let Some(hostname) = hostname {
            device.name = hostname;
        }
        device.mac_address = mac.unwrap_or_else(|| UNKNOWN.to_string());
        device.device_type = device_type.unwrap_or_else(|| UNKNOWN.to_string());
        device
    }

    /// Probe one address and fold the result into the roster. Returns whether it answered.
    async fn sweep_address(&self, ip: Ipv4Addr, ping_timeout: Duration) -> bool {
        let Some(response_time) = self.backends.pinger.ping(ip, ping_timeout).await else {
            // Misses never create records, they only flip known ones
            if let Some(device) = self.registry.mark_offline(ip).await {
                debug!(ip = %ip, "Device offline");
                self.events.device(DeviceEvent::Updated(device));
            }
            return false;
        };

        let probed = self.identify(ip, response_time).await;
        let (device, inserted) = self.registry.upsert(probed).await;
        debug!(
            ip = %ip,
            name = %device.name,
            device_type = %device.device_type,
            rtt_ms = response_time.as_millis() as u64,
            "Device online"
        );
        self.events.device(if inserted {
            DeviceEvent::Discovered(device)
        } else {
            DeviceEvent::Updated(device)
        });
        true
    }
}

/// Sweeps the configured subnets and keeps the device roster up to date
pub struct NetworkScanner {
    options: RwLock<ScanOptions>,
    prober: Arc<Prober>,
    registry: Arc<DeviceRegistry>,
    events: EventHub,
    schedule: Mutex<Schedule>,
    timers: Mutex<Option<Timers>>,
    armed: AtomicBool,
    sweeping: AtomicBool,
    /// Bumped by every pause; sweeps and timers stop when it moves
    pause_epoch: AtomicU64,
    dispatched: AtomicU64,
}

impl NetworkScanner {
    pub fn new(
        options: ScanOptions,
        backends: ScanBackends,
        chain: DetectionChain,
    ) -> Result<Self, OptionsError> {
        Self::with_registry(options, backends, chain, Arc::new(DeviceRegistry::new()))
    }

    /// Use an existing (e.g. already hydrated) registry
    pub fn with_registry(
        options: ScanOptions,
        backends: ScanBackends,
        chain: DetectionChain,
        registry: Arc<DeviceRegistry>,
    ) -> Result<Self, OptionsError> {
        options.validate()?;
        let events = EventHub::default();
        let prober = Arc::new(Prober {
            backends,
            chain,
            registry: registry.clone(),
            events: events.clone(),
        });

        Ok(Self {
            options: RwLock::new(options),
            prober,
            registry,
            events,
            schedule: Mutex::new(Schedule::default()),
            timers: Mutex::new(None),
            armed: AtomicBool::new(false),
            sweeping: AtomicBool::new(false),
            pause_epoch: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
        })
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Snapshot of the active options
    pub async fn options(&self) -> ScanOptions {
        self.options.read().await.clone()
    }

    /// Replace the options. A sweep already running keeps its own snapshot.
    ///
    /// Turning continuous scanning off stops the timer; the scanner goes
    /// back to `Stopped` once any sweep in flight has finished.
    pub async fn update_options(&self, options: ScanOptions) -> Result<(), OptionsError> {
        options.validate()?;
        let continuous = options.enable_continuous_scanning;
        *self.options.write().await = options;
        info!("Scan options updated");

        if !continuous {
            let mut timers = self.timers.lock().await;
            if self.disarm(&mut timers).await {
                info!("Continuous scanning disabled");
                self.events.progress("Continuous scanning disabled");
            }
        }
        Ok(())
    }

    pub fn state(&self) -> ScanState {
        if self.is_sweeping() {
            ScanState::Sweeping
        } else if self.armed.load(Ordering::SeqCst) {
            ScanState::Armed
        } else {
            ScanState::Stopped
        }
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeping.load(Ordering::SeqCst)
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Detectors in the order they are tried
    pub fn detector_names(&self) -> Vec<String> {
        self.prober.chain.names().into_iter().map(String::from).collect()
    }

    /// Total per-address probes dispatched since creation
    pub fn dispatched_probes(&self) -> u64 {
        self.dispatched.load(Ordering::SeqCst)
    }

    pub async fn next_scan_time(&self) -> Option<DateTime<Utc>> {
        self.schedule.lock().await.next_scan
    }

    pub async fn last_scan_time(&self) -> Option<DateTime<Utc>> {
        self.schedule.lock().await.last_scan
    }

    /// Current roster
    pub async fn devices(&self) -> Vec<Device> {
        self.registry.snapshot().await
    }

    /// Explicitly drop a device from the roster
    pub async fn remove_device(&self, address: Ipv4Addr) -> Option<Device> {
        let removed = self.registry.remove(address).await;
        if removed.is_some() {
            info!(ip = %address, "Device removed from registry");
            self.events.device(DeviceEvent::Removed(address));
        }
        removed
    }

    /// Stopped -> Armed
    pub async fn start_scanning(self: &Arc<Self>) {
        self.arm("Scanning started").await;
    }

    /// Stopped -> Armed after a pause
    pub async fn resume_scanning(self: &Arc<Self>) {
        self.arm("Scanning resumed").await;
    }

    /// Armed -> Stopped. A sweep in flight stops dispatching but is not cancelled.
    pub async fn pause_scanning(&self) {
        let mut timers = self.timers.lock().await;
        self.pause_epoch.fetch_add(1, Ordering::SeqCst);
        let was_armed = self.disarm(&mut timers).await;

        if was_armed || self.is_sweeping() {
            info!("Scanning paused");
            self.events.progress("Scanning paused");
        }
    }

    /// Drop the continuous timers and the pending deadline. Returns whether
    /// the scanner was armed. Callers hold the timers lock.
    async fn disarm(&self, timers: &mut Option<Timers>) -> bool {
        let was_armed = self.armed.swap(false, Ordering::SeqCst);
        timers.take();
        self.set_next_scan(None).await;
        was_armed
    }

    async fn arm(self: &Arc<Self>, message: &str) {
        let mut timers = self.timers.lock().await;
        if self.armed.swap(true, Ordering::SeqCst) {
            debug!("Scanner already armed");
            return;
        }

        let options = self.options().await;
        let epoch = self.pause_epoch.load(Ordering::SeqCst);
        info!(
            continuous = options.enable_continuous_scanning,
            interval_minutes = options.scan_interval_minutes,
            "{}",
            message
        );
        self.events.progress(message);

        if options.enable_continuous_scanning {
            // Due immediately
            self.set_next_scan(None).await;
            *timers = Some(Timers {
                scheduler: tokio::spawn(self.clone().run_scheduler(epoch)),
                countdown: tokio::spawn(self.clone().run_countdown(epoch)),
            });
        } else {
            let scanner = self.clone();
            tokio::spawn(async move {
                scanner.scan_network_at(Some(epoch)).await;
            });
        }
    }

    /// Continuous-mode timer: sweep when due, then wait for the next deadline
    async fn run_scheduler(self: Arc<Self>, epoch: u64) {
        debug!("Scan scheduler started");
        loop {
            if self.pause_epoch.load(Ordering::SeqCst) != epoch {
                break;
            }

            if let Some(next) = self.next_scan_time().await {
                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                if !wait.is_zero() {
                    sleep(wait).await;
                    // The deadline may have moved while sleeping
                    continue;
                }
            }

            if self.pause_epoch.load(Ordering::SeqCst) != epoch {
                break;
            }

            if !self.is_sweeping() {
                let scanner = self.clone();
                let sweep = tokio::spawn(async move {
                    scanner.scan_network_at(Some(epoch)).await;
                });
                if let Err(e) = sweep.await {
                    warn!(error = %e, "Scheduled sweep task failed");
                }
            }

            let due = self.next_scan_time().await;
            if due.map_or(true, |next| next <= Utc::now()) {
                let interval = self.options().await.scan_interval();
                self.set_next_scan(Some(deadline_after(Utc::now(), interval))).await;
            }
        }
        debug!("Scan scheduler stopped");
    }

    /// Observability only: publishes the time left until the next sweep
    async fn run_countdown(self: Arc<Self>, epoch: u64) {
        let mut ticker = interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if self.pause_epoch.load(Ordering::SeqCst) != epoch {
                break;
            }
            if let Some(next) = self.next_scan_time().await {
                let remaining = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                self.events.schedule(ScheduleEvent::Countdown(remaining));
            }
        }
    }

    async fn set_next_scan(&self, next: Option<DateTime<Utc>>) {
        let mut schedule = self.schedule.lock().await;
        if schedule.next_scan != next {
            schedule.next_scan = next;
            self.events.schedule(ScheduleEvent::NextScan(next));
        }
    }

    /// Run one full sweep. If a sweep is already running, returns the
    /// current roster without starting another.
    pub async fn scan_network(&self) -> Vec<Device> {
        self.scan_network_at(None).await
    }

    /// Sweep on behalf of a timer armed at `epoch`. A pause since then turns
    /// the sweep into a no-op; `None` means "as of now".
    async fn scan_network_at(&self, epoch: Option<u64>) -> Vec<Device> {
        if self
            .sweeping
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Sweep already in progress");
            return self.registry.snapshot().await;
        }

        {
            let _guard = SweepGuard(&self.sweeping);
            self.events.scanning(true);
            let epoch = epoch.unwrap_or_else(|| self.pause_epoch.load(Ordering::SeqCst));

            match self.sweep(epoch).await {
                Ok(summary) => {
                    info!(
                        dispatched = summary.dispatched,
                        online = summary.online,
                        paused = summary.paused,
                        "Sweep complete"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "Sweep aborted");
                    self.events.error(format!("Network scan failed: {}", e));
                }
            }

            if !self.options().await.enable_continuous_scanning {
                self.armed.store(false, Ordering::SeqCst);
            }
        }

        self.events.scanning(false);
        self.registry.snapshot().await
    }

    async fn sweep(&self, epoch: u64) -> Result<SweepSummary, SweepError> {
        let options = self.options().await;

        let prefixes = self.prober.backends.subnets.subnets().await?;
        let mut targets = Vec::with_capacity(prefixes.len());
        for prefix in prefixes {
            match parse_prefix(&prefix) {
                Ok(octets) => targets.push((prefix, octets)),
                Err(e) => {
                    warn!(error = %e, "Skipping subnet");
                    self.events.error(e.to_string());
                }
            }
        }
        if targets.is_empty() {
            return Err(SweepError::NoSubnets);
        }

        // Paused before anything was dispatched, leave the roster as it is
        if self.pause_epoch.load(Ordering::SeqCst) != epoch {
            info!("Sweep cancelled by pause before dispatch");
            return Ok(SweepSummary {
                paused: true,
                ..Default::default()
            });
        }

        let was_online = self.registry.mark_all_offline().await;
        let total = targets.len() * options.addresses_per_subnet();
        info!(
            subnets = targets.len(),
            addresses = total,
            previously_online = was_online,
            "Starting network sweep"
        );
        self.events.progress(format!(
            "Scanning {} addresses on {}",
            total,
            targets
                .iter()
                .map(|(p, _)| format!("{}.0/24", p))
                .collect::<Vec<_>>()
                .join(", ")
        ));

        let limiter = Arc::new(Semaphore::new(options.max_concurrent_connections));
        let ping_timeout = options.ping_timeout();
        let throttle = options.throttle_delay();
        let mut tasks = JoinSet::new();
        let mut summary = SweepSummary::default();

        'dispatch: for (prefix, octets) in &targets {
            for octet in options.start_octet..=options.end_octet {
                if self.pause_epoch.load(Ordering::SeqCst) != epoch {
                    summary.paused = true;
                    break 'dispatch;
                }

                let Ok(permit) = limiter.clone().acquire_owned().await else {
                    break 'dispatch;
                };

                // Waiting for a slot can take a while, check again
                if self.pause_epoch.load(Ordering::SeqCst) != epoch {
                    summary.paused = true;
                    break 'dispatch;
                }

                let ip = host_address(*octets, octet);
                let prober = self.prober.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    prober.sweep_address(ip, ping_timeout).await
                });
                summary.dispatched += 1;
                self.dispatched.fetch_add(1, Ordering::SeqCst);

                if summary.dispatched % options.devices_before_throttle == 0 {
                    self.events.progress(format!(
                        "Scanning {}.x ({}/{})",
                        prefix, summary.dispatched, total
                    ));
                    if !throttle.is_zero() {
                        sleep(throttle).await;
                    }
                }
            }
        }

        if summary.paused {
            info!(
                dispatched = summary.dispatched,
                "Sweep paused, waiting for dispatched probes"
            );
        }

        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(true) => summary.online += 1,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Probe task failed"),
            }
        }

        let completed = Utc::now();
        self.schedule.lock().await.last_scan = Some(completed);
        self.events.schedule(ScheduleEvent::LastScanCompleted(completed));

        if self.is_armed() && options.enable_continuous_scanning {
            self.set_next_scan(Some(deadline_after(completed, options.scan_interval()))).await;
        }

        self.events.progress(format!(
            "Scan complete: {} of {} addresses responded",
            summary.online, summary.dispatched
        ));
        Ok(summary)
    }

    /// Probe one address without touching the roster.
    ///
    /// Returns `None` for a malformed address. Known devices are merged into
    /// a copy of their roster entry so the result carries the remembered MAC.
    pub async fn scan_single_device(&self, address: &str) -> Option<Device> {
        let ip = match address.trim().parse::<Ipv4Addr>() {
            Ok(ip) => ip,
            Err(_) => {
                warn!(address = %address, "Invalid IP address");
                self.events.error(format!("Invalid IP address: {}", address));
                return None;
            }
        };

        self.events.progress(format!("Scanning {}", ip));
        let ping_timeout = self.options().await.ping_timeout();
        let known = self.registry.find_by_address(ip).await;

        let device = match self.prober.backends.pinger.ping(ip, ping_timeout).await {
            Some(response_time) => {
                let probed = self.prober.identify(ip, response_time).await;
                match known {
                    Some(mut device) => {
                        device.merge_probe(&probed);
                        device
                    }
                    None => probed,
                }
            }
            None => {
                let mut device = known.unwrap_or_else(|| Device::new(ip));
                device.mark_offline();
                device
            }
        };

        self.events.progress(format!(
            "{} is {}",
            device,
            if device.is_online { "online" } else { "offline" }
        ));
        Some(device)
    }
}

/// `from + interval`, saturating at the latest representable time
fn deadline_after(from: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(interval)
        .ok()
        .and_then(|interval| from.checked_add_signed(interval))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl std::fmt::Debug for NetworkScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkScanner")
            .field("state", &self.state())
            .field("chain", &self.prober.chain)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_saturates() {
        let now = Utc::now();
        assert_eq!(
            deadline_after(now, Duration::from_secs(60)),
            now + chrono::Duration::minutes(1)
        );
        assert_eq!(
            deadline_after(now, Duration::from_secs(u64::MAX)),
            DateTime::<Utc>::MAX_UTC
        );
        assert_eq!(
            deadline_after(DateTime::<Utc>::MAX_UTC, Duration::from_secs(1)),
            DateTime::<Utc>::MAX_UTC
        );
    }
}
