//! UDP device discovery: periodic announcement broadcast plus a listener
//! that maintains the table of peers seen on the LAN.
//!
//! One background thread owns the socket and the device table. Each pass
//! through its loop it (1) rebroadcasts our announcement in both wire
//! encodings when the broadcast interval has elapsed, (2) sweeps stale
//! peers out of the table when the sweep interval has elapsed, and
//! (3) reads one datagram with a 500 ms timeout so the loop keeps
//! turning even on a silent network.
//!
//! Peers are deduplicated by device id (falling back to sender IP when a
//! legacy peer announces without one); a peer is *online* while its last
//! announcement is under 30 s old and is evicted entirely after 5 min of
//! silence, emitting [`DiscoveryEvent::DeviceLost`].

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use linkdrop_core::protocol::discovery::{broadcast_payloads, parse_announcement, Announcement, DISCOVERY_PORT};
use linkdrop_core::{DiscoveredDevice, Platform};

use crate::infrastructure::now_ms;

/// Socket read timeout; bounds how long `stop` can block on join.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Error type for starting the discovery service. Send errors at
/// runtime never surface here; they fall back to the subnet broadcast
/// and are otherwise logged and tolerated.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The discovery port could not be bound, usually because another
    /// instance is already running on this machine.
    #[error("failed to bind discovery socket on UDP port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// The worker thread could not be spawned.
    #[error("failed to spawn discovery worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Who we announce ourselves as.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub device_id: String,
    pub device_name: String,
    pub platform: Platform,
    pub version: String,
    pub capabilities: Vec<String>,
}

/// Discovery cadence and addressing.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub port: u16,
    pub broadcast_interval: Duration,
    /// How often the table is swept for stale peers.
    pub sweep_interval: Duration,
    /// Subnet-directed broadcast used when the global broadcast address
    /// is rejected (some Wi-Fi stacks drop 255.255.255.255).
    pub fallback_broadcast: Ipv4Addr,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: DISCOVERY_PORT,
            broadcast_interval: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(60),
            fallback_broadcast: Ipv4Addr::new(192, 168, 1, 255),
        }
    }
}

/// Peer table changes, consumed by the application layer.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    /// First sighting of a peer.
    DeviceFound(DiscoveredDevice),
    /// Peer evicted after the stale timeout.
    DeviceLost(DiscoveredDevice),
}

/// Outcome of folding one announcement into the table.
#[derive(Debug, PartialEq)]
enum Upsert {
    New(DiscoveredDevice),
    Refreshed,
}

/// Table of peers currently known on the LAN. Pure bookkeeping; callers
/// supply timestamps, which keeps staleness decisions testable.
#[derive(Default)]
struct DeviceTable {
    devices: Vec<DiscoveredDevice>,
}

impl DeviceTable {
    /// Folds an announcement into the table. Peers without a device id
    /// (legacy senders) are keyed by sender IP instead.
    fn upsert(&mut self, announcement: Announcement, src: SocketAddr, now_ms: u64) -> Upsert {
        let ip = src.ip().to_string();
        let device_id = if announcement.device_id.is_empty() {
            ip.clone()
        } else {
            announcement.device_id
        };

        if let Some(existing) = self.devices.iter_mut().find(|d| d.device_id == device_id) {
            existing.device_name = announcement.device_name;
            existing.ip = ip;
            existing.port = src.port();
            existing.version = announcement.version;
            existing.capabilities = announcement.capabilities;
            existing.last_seen = now_ms;
            return Upsert::Refreshed;
        }

        let device = DiscoveredDevice {
            device_id,
            device_name: announcement.device_name,
            ip,
            port: src.port(),
            platform: announcement.platform,
            capabilities: announcement.capabilities,
            version: announcement.version,
            discovery_time: now_ms,
            last_seen: now_ms,
        };
        self.devices.push(device.clone());
        Upsert::New(device)
    }

    /// Removes and returns every peer past the stale timeout.
    fn evict_stale(&mut self, now_ms: u64) -> Vec<DiscoveredDevice> {
        let (stale, fresh) = std::mem::take(&mut self.devices)
            .into_iter()
            .partition(|d| d.is_stale(now_ms));
        self.devices = fresh;
        stale
    }

    fn snapshot(&self) -> Vec<DiscoveredDevice> {
        self.devices.clone()
    }

    fn online(&self, now_ms: u64) -> Vec<DiscoveredDevice> {
        self.devices
            .iter()
            .filter(|d| d.is_online(now_ms))
            .cloned()
            .collect()
    }
}

/// Background UDP discovery service.
pub struct DiscoveryService {
    identity: LocalIdentity,
    config: DiscoveryConfig,
    table: Arc<Mutex<DeviceTable>>,
    running: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
    events: mpsc::Sender<DiscoveryEvent>,
}

impl DiscoveryService {
    /// Creates the service and returns it with the event receiver.
    /// Nothing touches the network until [`start`](Self::start).
    pub fn new(
        identity: LocalIdentity,
        config: DiscoveryConfig,
    ) -> (Self, mpsc::Receiver<DiscoveryEvent>) {
        let (tx, rx) = mpsc::channel(64);
        (
            Self {
                identity,
                config,
                table: Arc::new(Mutex::new(DeviceTable::default())),
                running: Arc::new(AtomicBool::new(false)),
                worker: None,
                events: tx,
            },
            rx,
        )
    }

    /// Binds the discovery socket and spawns the worker thread.
    pub fn start(&mut self) -> Result<(), DiscoveryError> {
        if self.worker.is_some() {
            return Ok(());
        }

        let port = self.config.port;
        let bind = |source| DiscoveryError::Bind { port, source };
        let socket =
            UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).map_err(bind)?;
        socket.set_broadcast(true).map_err(bind)?;
        socket.set_read_timeout(Some(READ_TIMEOUT)).map_err(bind)?;

        self.running.store(true, Ordering::SeqCst);
        info!(port = self.config.port, "discovery service started");

        let identity = self.identity.clone();
        let config = self.config.clone();
        let table = Arc::clone(&self.table);
        let running = Arc::clone(&self.running);
        let events = self.events.clone();

        let worker = std::thread::Builder::new()
            .name("discovery".into())
            .spawn(move || {
                run_discovery_loop(socket, identity, config, table, running, events);
            })?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Stops the worker thread and waits for it to exit (at most one
    /// socket read timeout).
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("discovery worker panicked");
            }
        }
        info!("discovery service stopped");
    }

    /// Every peer currently in the table, online or not.
    pub fn devices(&self) -> Vec<DiscoveredDevice> {
        lock_table(&self.table).snapshot()
    }

    /// Peers whose last announcement is under the online threshold.
    pub fn online_devices(&self) -> Vec<DiscoveredDevice> {
        lock_table(&self.table).online(now_ms())
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A poisoned table mutex only means a worker panicked mid-update; the
/// table data is still usable.
fn lock_table(table: &Mutex<DeviceTable>) -> MutexGuard<'_, DeviceTable> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn run_discovery_loop(
    socket: UdpSocket,
    identity: LocalIdentity,
    config: DiscoveryConfig,
    table: Arc<Mutex<DeviceTable>>,
    running: Arc<AtomicBool>,
    events: mpsc::Sender<DiscoveryEvent>,
) {
    let mut buf = [0u8; 2048];
    // Fire the first broadcast immediately, the first sweep a full
    // interval from now.
    let mut last_broadcast: Option<Instant> = None;
    let mut last_sweep = Instant::now();

    while running.load(Ordering::SeqCst) {
        if last_broadcast.map_or(true, |t| t.elapsed() >= config.broadcast_interval) {
            broadcast_cycle(&socket, &identity, &config);
            last_broadcast = Some(Instant::now());
        }

        if last_sweep.elapsed() >= config.sweep_interval {
            let stale = lock_table(&table).evict_stale(now_ms());
            for device in stale {
                debug!(device_id = %device.device_id, "peer went stale, evicting");
                let _ = events.blocking_send(DiscoveryEvent::DeviceLost(device));
            }
            last_sweep = Instant::now();
        }

        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                warn!("discovery socket read failed: {e}");
                continue;
            }
        };

        let announcement = match parse_announcement(&buf[..len]) {
            Ok(announcement) => announcement,
            Err(e) => {
                debug!(%src, "ignoring datagram: {e}");
                continue;
            }
        };

        // Our own broadcasts come back to us; same-platform peers are
        // not link candidates either way.
        if announcement.platform == identity.platform {
            continue;
        }

        if let Upsert::New(device) = lock_table(&table).upsert(announcement, src, now_ms()) {
            info!(
                device_id = %device.device_id,
                device_name = %device.device_name,
                ip = %device.ip,
                "peer discovered"
            );
            let _ = events.blocking_send(DiscoveryEvent::DeviceFound(device));
        }
    }
}

/// Sends our announcement in both wire encodings. A send failure on the
/// global broadcast address falls back to the subnet-directed one.
fn broadcast_cycle(socket: &UdpSocket, identity: &LocalIdentity, config: &DiscoveryConfig) {
    let announcement = Announcement {
        platform: identity.platform,
        device_id: identity.device_id.clone(),
        device_name: identity.device_name.clone(),
        version: identity.version.clone(),
        capabilities: identity.capabilities.clone(),
        timestamp: now_ms(),
    };

    for payload in broadcast_payloads(&announcement) {
        let global = (Ipv4Addr::BROADCAST, config.port);
        if let Err(e) = socket.send_to(payload.as_bytes(), global) {
            debug!("global broadcast failed ({e}), trying subnet broadcast");
            let subnet = (config.fallback_broadcast, config.port);
            if let Err(e) = socket.send_to(payload.as_bytes(), subnet) {
                warn!("subnet broadcast failed: {e}");
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use linkdrop_core::{ONLINE_THRESHOLD_MS, STALE_TIMEOUT_MS};

    fn announcement(id: &str, name: &str) -> Announcement {
        Announcement {
            platform: Platform::Android,
            device_id: id.into(),
            device_name: name.into(),
            version: "1.0.0".into(),
            capabilities: vec!["file_transfer".into()],
            timestamp: 0,
        }
    }

    fn addr(last_octet: u8) -> SocketAddr {
        SocketAddr::from(([192, 168, 1, last_octet], 8190))
    }

    #[test]
    fn test_first_sighting_is_new_then_refreshed() {
        let mut table = DeviceTable::default();

        let outcome = table.upsert(announcement("phone-1", "Pixel"), addr(10), 1_000);
        assert!(matches!(outcome, Upsert::New(ref d) if d.device_id == "phone-1"));

        let outcome = table.upsert(announcement("phone-1", "Pixel"), addr(10), 2_000);
        assert_eq!(outcome, Upsert::Refreshed);
        assert_eq!(table.snapshot().len(), 1);
        assert_eq!(table.snapshot()[0].last_seen, 2_000);
        assert_eq!(table.snapshot()[0].discovery_time, 1_000);
    }

    #[test]
    fn test_legacy_peer_without_id_is_keyed_by_ip() {
        let mut table = DeviceTable::default();
        let outcome = table.upsert(announcement("", "OldPhone"), addr(23), 1_000);
        match outcome {
            Upsert::New(d) => assert_eq!(d.device_id, "192.168.1.23"),
            other => panic!("expected New, got {other:?}"),
        }

        // Same IP announcing again refreshes rather than duplicating.
        let outcome = table.upsert(announcement("", "OldPhone"), addr(23), 2_000);
        assert_eq!(outcome, Upsert::Refreshed);
        assert_eq!(table.snapshot().len(), 1);
    }

    #[test]
    fn test_refresh_picks_up_changed_address_and_name() {
        let mut table = DeviceTable::default();
        table.upsert(announcement("phone-1", "Pixel"), addr(10), 1_000);
        table.upsert(announcement("phone-1", "Pixel 9"), addr(42), 2_000);

        let devices = table.snapshot();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_name, "Pixel 9");
        assert_eq!(devices[0].ip, "192.168.1.42");
    }

    #[test]
    fn test_stale_peers_are_evicted_fresh_ones_kept() {
        let mut table = DeviceTable::default();
        table.upsert(announcement("old", "Old"), addr(10), 0);
        table.upsert(announcement("new", "New"), addr(11), STALE_TIMEOUT_MS);

        let now = STALE_TIMEOUT_MS + 1;
        let stale = table.evict_stale(now);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].device_id, "old");

        let remaining = table.snapshot();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].device_id, "new");
    }

    #[test]
    fn test_online_filter_uses_thirty_second_threshold() {
        let mut table = DeviceTable::default();
        table.upsert(announcement("fresh", "Fresh"), addr(10), 100_000);
        table.upsert(announcement("quiet", "Quiet"), addr(11), 100_000 - ONLINE_THRESHOLD_MS);

        let online = table.online(100_000 + 1_000);
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].device_id, "fresh");
        // Quiet peer is offline but not yet stale.
        assert_eq!(table.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_service_start_stop_round_trip() {
        let identity = LocalIdentity {
            device_id: "host-1".into(),
            device_name: "Test Host".into(),
            platform: Platform::Windows,
            version: "1.0.0".into(),
            capabilities: vec!["file_transfer".into()],
        };
        // Port 0 so the test never collides with a real instance.
        let config = DiscoveryConfig {
            port: 0,
            ..DiscoveryConfig::default()
        };
        let (mut service, _events) = DiscoveryService::new(identity, config);
        service.start().expect("bind discovery socket");
        assert!(service.devices().is_empty());
        service.stop();
    }
}
