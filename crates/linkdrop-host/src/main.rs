//! LinkDrop host entry point.
//!
//! Wires together all infrastructure services and starts the Tokio async
//! runtime.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()          -- TOML config, defaults on first run
//!  └─ start services
//!       ├─ DiscoveryService    (UDP background thread)
//!       ├─ ConnectionManager   (pool + health + reconnection)
//!       ├─ TransferManager     (chunked file transfer sessions)
//!       └─ LinkControl         (Tokio task: discovery → connections)
//! ```

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use linkdrop_host::application::link_control::LinkControl;
use linkdrop_host::infrastructure::network::discovery::DiscoveryService;
use linkdrop_host::infrastructure::network::health::HealthProbe;
use linkdrop_host::infrastructure::network::manager::{ConnectionEvent, ConnectionManager};
use linkdrop_host::infrastructure::storage::config;
use linkdrop_host::infrastructure::transfer::{TransferEvent, TransferManager};

/// Liveness probe for the headless build. The protocol layer that opens
/// real transports supplies its own ping-based probe; until one is
/// attached, connections are assumed live and failures surface through
/// the transport instead.
struct AssumeHealthy;

#[async_trait::async_trait]
impl HealthProbe for AssumeHealthy {
    async fn check(&self, _connection_id: uuid::Uuid) -> bool {
        true
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first so its log level can seed the filter.
    let cfg = config::load_config()?;

    // Initialise structured logging. Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cfg.host.log_level.clone())),
        )
        .init();

    info!("LinkDrop host starting");

    // First run: persist the generated device id so peers recognise this
    // host across restarts.
    if !config::config_file_path()?.exists() {
        config::save_config(&cfg)?;
        info!(device_id = %cfg.host.device_id, "wrote initial config");
    }

    // Shutdown flag shared across all background services.
    let running = Arc::new(AtomicBool::new(true));

    // ── Connection manager ────────────────────────────────────────────────────
    let probe: Arc<dyn HealthProbe> = Arc::new(AssumeHealthy);
    let (manager, mut connection_events) = ConnectionManager::new(cfg.manager_config(), probe);
    let manager = Arc::new(manager);
    manager.start().await;

    tokio::spawn(async move {
        while let Some(event) = connection_events.recv().await {
            match event {
                ConnectionEvent::Established { connection_id } => {
                    info!(%connection_id, "connection established");
                }
                ConnectionEvent::ReconnectFailed {
                    connection_id,
                    attempts,
                } => {
                    error!(%connection_id, attempts, "connection abandoned");
                }
                other => {
                    tracing::debug!(?other, "connection event");
                }
            }
        }
    });

    // ── Transfer manager ──────────────────────────────────────────────────────
    let (transfers, mut transfer_events) = TransferManager::new(cfg.transfer_config());
    let _transfers = Arc::new(transfers);

    tokio::spawn(async move {
        while let Some(event) = transfer_events.recv().await {
            match event {
                TransferEvent::Completed { session } => {
                    info!(
                        transfer_id = %session.session_id,
                        path = %session.file_path,
                        "file received"
                    );
                }
                TransferEvent::Failed {
                    transfer_id,
                    reason,
                } => {
                    error!(transfer_id, reason, "transfer failed");
                }
                other => {
                    tracing::debug!(?other, "transfer event");
                }
            }
        }
    });

    // ── Discovery + link control ──────────────────────────────────────────────
    let (mut discovery, discovery_events) =
        DiscoveryService::new(cfg.local_identity(), cfg.discovery_config());
    match discovery.start() {
        Ok(()) => info!(
            "discovery broadcasting on UDP {}",
            cfg.network.discovery_port
        ),
        Err(e) => error!("failed to start discovery: {e}"),
    }

    let link_control = Arc::new(LinkControl::new(Arc::clone(&manager)));
    tokio::spawn(Arc::clone(&link_control).run(discovery_events));

    // ── Ctrl-C / SIGTERM handler ──────────────────────────────────────────────
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            running_clone.store(false, Ordering::Relaxed);
        }
    });

    info!("LinkDrop host ready.  Press Ctrl-C to exit.");

    loop {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if !running.load(Ordering::Relaxed) {
            break;
        }
    }

    discovery.stop();
    manager.shutdown().await;
    info!("LinkDrop host stopped");
    Ok(())
}
