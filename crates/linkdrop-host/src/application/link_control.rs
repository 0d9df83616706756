//! LinkControl use-case: turns discovery events into managed
//! connections.
//!
//! When a peer is first seen on the LAN a logical connection is opened
//! for it; when discovery evicts the peer as stale its connection is
//! closed. One link per device id, whatever order events arrive in:
//! a peer that flaps between lost and found never accumulates multiple
//! connections.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use linkdrop_core::DiscoveredDevice;

use crate::infrastructure::network::discovery::DiscoveryEvent;
use crate::infrastructure::network::manager::ConnectionManager;
use crate::infrastructure::network::pool::{ConnectionId, PoolError};

/// One discovered peer and the connection (if any) serving it.
#[derive(Debug, Clone)]
pub struct PeerLink {
    pub device: DiscoveredDevice,
    /// `None` when the pool was full at discovery time; the peer stays
    /// listed and gets a connection on its next sighting.
    pub connection_id: Option<ConnectionId>,
}

/// Maintains the device-id → connection mapping.
pub struct LinkControl {
    manager: Arc<ConnectionManager>,
    links: Mutex<HashMap<String, PeerLink>>,
}

impl LinkControl {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            links: Mutex::new(HashMap::new()),
        }
    }

    /// Consumes discovery events until the channel closes. Spawn this on
    /// the runtime alongside the discovery service.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<DiscoveryEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
    }

    /// Applies one discovery event to the link table.
    pub async fn handle_event(&self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::DeviceFound(device) => self.on_device_found(device).await,
            DiscoveryEvent::DeviceLost(device) => self.on_device_lost(&device.device_id).await,
        }
    }

    async fn on_device_found(&self, device: DiscoveredDevice) {
        let mut links = self.links.lock().await;

        if let Some(link) = links.get_mut(&device.device_id) {
            // Refresh the stored record either way; `device` is still
            // needed below when the peer has no connection yet.
            link.device = device.clone();
            if link.connection_id.is_some() {
                return;
            }
        }

        let connection_id = match self.manager.create_connection(&device.device_id).await {
            Ok(connection) => {
                info!(
                    device_id = %device.device_id,
                    connection_id = %connection.id,
                    "link opened for discovered peer"
                );
                Some(connection.id)
            }
            Err(PoolError::ResourceExhausted { capacity }) => {
                warn!(
                    device_id = %device.device_id,
                    capacity,
                    "pool full, peer tracked without a connection"
                );
                None
            }
            Err(e) => {
                warn!(device_id = %device.device_id, "could not open link: {e}");
                None
            }
        };

        links.insert(
            device.device_id.clone(),
            PeerLink {
                device,
                connection_id,
            },
        );
    }

    async fn on_device_lost(&self, device_id: &str) {
        let link = self.links.lock().await.remove(device_id);
        let Some(link) = link else {
            return;
        };

        if let Some(connection_id) = link.connection_id {
            info!(device_id, %connection_id, "peer gone, closing its link");
            if let Err(e) = self.manager.close_connection(connection_id).await {
                // The manager may have removed it first (reconnect
                // attempts exhausted); nothing left to do.
                warn!(device_id, "link already gone: {e}");
            }
        }
    }

    /// Snapshot of all tracked peers.
    pub async fn links(&self) -> Vec<PeerLink> {
        self.links.lock().await.values().cloned().collect()
    }

    /// The link for one device, if the peer is currently tracked.
    pub async fn link_for(&self, device_id: &str) -> Option<PeerLink> {
        self.links.lock().await.get(device_id).cloned()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
