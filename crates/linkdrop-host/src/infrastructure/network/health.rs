//! Periodic liveness probing for pooled connections.
//!
//! Each monitored connection gets its own Tokio task that fires every
//! `interval`, invoking the pluggable [`HealthProbe`] with `timeout` as
//! the deadline. Consecutive failures are counted per connection; at
//! `max_failures` an [`HealthEvent::Unhealthy`] is emitted and the task
//! exits; probing for that connection stays stopped until [`start`] is
//! called for it again, which is exactly what the reconnection flow does
//! once the link is re-established.
//!
//! Task handles are tracked in a map keyed by connection id so that
//! [`stop`] can abort the loop synchronously: once `stop` returns, no
//! further probe for that connection can fire.
//!
//! [`start`]: HealthChecker::start
//! [`stop`]: HealthChecker::stop

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::pool::ConnectionId;

/// Probe cadence and failure policy.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Time between probes of one connection.
    pub interval: Duration,
    /// Deadline for a single probe; overruns count as failures.
    pub timeout: Duration,
    /// Consecutive failures before the connection is declared unhealthy.
    pub max_failures: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            max_failures: 3,
        }
    }
}

/// Pluggable liveness probe. The production probe pings the transport
/// under the connection; tests script arbitrary outcomes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Returns `true` if the connection answered in time.
    async fn check(&self, connection_id: ConnectionId) -> bool;
}

/// Outcome events emitted by the checker.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthEvent {
    Passed {
        connection_id: ConnectionId,
        latency_ms: f64,
    },
    Failed {
        connection_id: ConnectionId,
        failures: u32,
    },
    /// `max_failures` consecutive failures reached; probing has stopped
    /// for this connection.
    Unhealthy {
        connection_id: ConnectionId,
        failures: u32,
    },
}

impl HealthEvent {
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            HealthEvent::Passed { connection_id, .. }
            | HealthEvent::Failed { connection_id, .. }
            | HealthEvent::Unhealthy { connection_id, .. } => *connection_id,
        }
    }
}

/// Runs one probe loop per monitored connection.
pub struct HealthChecker {
    config: HealthConfig,
    probe: Arc<dyn HealthProbe>,
    tasks: HashMap<ConnectionId, JoinHandle<()>>,
    events: mpsc::Sender<HealthEvent>,
}

impl HealthChecker {
    /// Creates a checker and returns it together with the event receiver.
    pub fn new(
        probe: Arc<dyn HealthProbe>,
        config: HealthConfig,
    ) -> (Self, mpsc::Receiver<HealthEvent>) {
        let (tx, rx) = mpsc::channel(64);
        (
            Self {
                config,
                probe,
                tasks: HashMap::new(),
                events: tx,
            },
            rx,
        )
    }

    /// Starts (or restarts) the probe loop for a connection. Restarting
    /// resets the consecutive-failure count.
    pub fn start(&mut self, connection_id: ConnectionId) {
        self.stop(connection_id);

        let probe = Arc::clone(&self.probe);
        let tx = self.events.clone();
        let cfg = self.config.clone();

        let handle = tokio::spawn(async move {
            let mut failures = 0u32;
            loop {
                tokio::time::sleep(cfg.interval).await;

                let started = std::time::Instant::now();
                let healthy = matches!(
                    tokio::time::timeout(cfg.timeout, probe.check(connection_id)).await,
                    Ok(true)
                );

                if healthy {
                    failures = 0;
                    let event = HealthEvent::Passed {
                        connection_id,
                        latency_ms: started.elapsed().as_secs_f64() * 1_000.0,
                    };
                    if tx.send(event).await.is_err() {
                        break; // receiver dropped, checker is shutting down
                    }
                } else {
                    failures += 1;
                    let event = HealthEvent::Failed {
                        connection_id,
                        failures,
                    };
                    if tx.send(event).await.is_err() {
                        break;
                    }
                    if failures >= cfg.max_failures {
                        debug!(%connection_id, failures, "connection declared unhealthy");
                        let _ = tx
                            .send(HealthEvent::Unhealthy {
                                connection_id,
                                failures,
                            })
                            .await;
                        break;
                    }
                }
            }
        });

        self.tasks.insert(connection_id, handle);
    }

    /// Aborts the probe loop for a connection. Synchronous: when this
    /// returns the task can no longer fire.
    pub fn stop(&mut self, connection_id: ConnectionId) {
        if let Some(handle) = self.tasks.remove(&connection_id) {
            handle.abort();
        }
    }

    /// Whether a probe loop handle exists for the connection. The loop
    /// may already have exited after declaring the connection unhealthy.
    pub fn is_monitoring(&self, connection_id: ConnectionId) -> bool {
        self.tasks.contains_key(&connection_id)
    }

    pub fn monitored(&self) -> Vec<ConnectionId> {
        self.tasks.keys().copied().collect()
    }

    /// Aborts every probe loop.
    pub fn stop_all(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }
}

impl Drop for HealthChecker {
    fn drop(&mut self) {
        self.stop_all();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
