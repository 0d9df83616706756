//! ConnectionManager: connection lifecycle, health wiring, and
//! exponential-backoff reconnection.
//!
//! The manager is the only component that mutates a connection's state or
//! metrics; every caller serializes through its API. It owns the
//! [`ConnectionPool`] and a [`HealthChecker`], and wires the checker's
//! `Unhealthy` signal into the reconnection state machine:
//!
//! ```text
//! connecting ──► connected ──► disconnected / error
//!     ▲                               │
//!     │        backoff timer          │
//!     └──────── (attempt n) ◄─────────┘
//! ```
//!
//! Reconnection delays follow `min(base · 2ⁿ, 30 s)`; the attempt counter
//! is incremented before the timer is scheduled and reset to zero by
//! [`mark_connected`]. When `max_reconnect_attempts` is exhausted the
//! connection is removed from the pool and a terminal
//! [`ConnectionEvent::ReconnectFailed`] is emitted; that logical link is
//! dead and is not retried further.
//!
//! Every pending timer handle lives in a map keyed by connection id so
//! teardown can find and abort it: [`close_connection`] aborts the
//! reconnect timer and the health loop before touching the pool, so no
//! stale timer can resurrect a removed connection.
//!
//! [`mark_connected`]: ConnectionManager::mark_connected
//! [`close_connection`]: ConnectionManager::close_connection

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::health::{HealthChecker, HealthConfig, HealthEvent, HealthProbe};
use super::pool::{
    Connection, ConnectionId, ConnectionMetrics, ConnectionPool, ConnectionState, MetricsUpdate,
    PoolError, PoolStats,
};

/// Reconnection delays never exceed this, whatever the attempt count.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Transport tag recorded on connections the manager opens.
const DEFAULT_PROTOCOL: &str = "websocket";

/// Tuning knobs for the manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub max_connections: usize,
    /// Deadline for connect handshakes and health probes.
    pub connection_timeout: Duration,
    pub health_check_interval: Duration,
    /// Base delay for the exponential reconnect backoff.
    pub reconnect_backoff: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            connection_timeout: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(30),
            reconnect_backoff: Duration::from_secs(1),
            max_reconnect_attempts: 30,
        }
    }
}

/// Per-connection transport supplied by the protocol layer outside the
/// core (WebSocket, raw socket, …). Inbound bytes reach the core through
/// whatever channel that layer prefers; only the outbound/teardown half
/// is needed here.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, bytes: &[u8]) -> std::io::Result<()>;
    async fn close(&self);
}

/// Typed lifecycle events, consumed by logging/UI collaborators.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Created { connection: Connection },
    Added { connection_id: ConnectionId },
    Removed { connection_id: ConnectionId },
    Established { connection_id: ConnectionId },
    Lost { connection_id: ConnectionId },
    StateChanged {
        connection_id: ConnectionId,
        old_state: ConnectionState,
        new_state: ConnectionState,
    },
    MetricsUpdated {
        connection_id: ConnectionId,
        metrics: ConnectionMetrics,
    },
    Reconnecting {
        connection_id: ConnectionId,
        attempt: u32,
        next_retry_in: Duration,
    },
    ReconnectAttempt {
        connection_id: ConnectionId,
        attempt: u32,
    },
    /// Terminal: attempts exhausted, connection removed from the pool.
    ReconnectFailed {
        connection_id: ConnectionId,
        attempts: u32,
    },
    HealthCheckPassed {
        connection_id: ConnectionId,
        latency_ms: f64,
    },
    HealthCheckFailed {
        connection_id: ConnectionId,
        failures: u32,
    },
    Unhealthy {
        connection_id: ConnectionId,
        failures: u32,
    },
}

/// Error type for send operations routed through a connection.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("no transport attached to connection {0}")]
    NoTransport(ConnectionId),
    #[error("transport send failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Computes the reconnect delay for the given attempt count:
/// `min(base · 2^attempts, 30 s)`.
pub fn backoff_delay(base: Duration, attempts: u32) -> Duration {
    let base_ms = base.as_millis() as u64;
    let factor = 1u64.checked_shl(attempts).unwrap_or(u64::MAX);
    Duration::from_millis(
        base_ms
            .saturating_mul(factor)
            .min(MAX_RECONNECT_DELAY.as_millis() as u64),
    )
}

struct ManagerInner {
    config: ManagerConfig,
    pool: Mutex<ConnectionPool>,
    health: Mutex<HealthChecker>,
    /// Reconnection attempts already made, per live connection.
    attempts: Mutex<HashMap<ConnectionId, u32>>,
    /// Pending backoff timers, keyed by connection id for cancellation.
    reconnect_timers: Mutex<HashMap<ConnectionId, JoinHandle<()>>>,
    transports: Mutex<HashMap<ConnectionId, Arc<dyn Transport>>>,
    events: mpsc::Sender<ConnectionEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

/// Orchestrator for connection lifecycle. Cheap to clone handles are not
/// exposed; share the manager itself behind an `Arc` when needed.
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
    /// Health event stream, consumed by [`start`](Self::start).
    health_rx: Mutex<Option<mpsc::Receiver<HealthEvent>>>,
}

impl ConnectionManager {
    /// Creates a manager and returns it together with the event receiver.
    ///
    /// Call [`start`](Self::start) afterwards to begin reacting to health
    /// probe outcomes; construction alone spawns nothing.
    pub fn new(
        config: ManagerConfig,
        probe: Arc<dyn HealthProbe>,
    ) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);

        let (health, health_rx) = HealthChecker::new(
            probe,
            HealthConfig {
                interval: config.health_check_interval,
                timeout: config.connection_timeout,
                max_failures: 3,
            },
        );

        let inner = Arc::new(ManagerInner {
            pool: Mutex::new(ConnectionPool::new(config.max_connections)),
            health: Mutex::new(health),
            attempts: Mutex::new(HashMap::new()),
            reconnect_timers: Mutex::new(HashMap::new()),
            transports: Mutex::new(HashMap::new()),
            events: event_tx,
            pump: Mutex::new(None),
            config,
        });

        (
            Self {
                inner,
                health_rx: Mutex::new(Some(health_rx)),
            },
            event_rx,
        )
    }

    /// Spawns the pump that turns health-check outcomes into state
    /// transitions and reconnection scheduling. Idempotent.
    pub async fn start(&self) {
        let Some(mut rx) = self.health_rx.lock().await.take() else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    HealthEvent::Passed {
                        connection_id,
                        latency_ms,
                    } => {
                        inner.emit(ConnectionEvent::HealthCheckPassed {
                            connection_id,
                            latency_ms,
                        });
                    }
                    HealthEvent::Failed {
                        connection_id,
                        failures,
                    } => {
                        inner.emit(ConnectionEvent::HealthCheckFailed {
                            connection_id,
                            failures,
                        });
                    }
                    HealthEvent::Unhealthy {
                        connection_id,
                        failures,
                    } => {
                        inner.emit(ConnectionEvent::Unhealthy {
                            connection_id,
                            failures,
                        });
                        ManagerInner::handle_unhealthy(&inner, connection_id).await;
                    }
                }
            }
        });
        *self.inner.pump.lock().await = Some(handle);
    }

    /// Stops the pump, every health loop, and every pending reconnect
    /// timer. Connections remain in the pool; this is process teardown,
    /// not link teardown.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.inner.pump.lock().await.take() {
            handle.abort();
        }
        self.inner.health.lock().await.stop_all();
        for (_, handle) in self.inner.reconnect_timers.lock().await.drain() {
            handle.abort();
        }
    }

    /// Opens a logical connection for `client_id` in state `connecting`
    /// and starts its health loop.
    ///
    /// # Errors
    ///
    /// [`PoolError::ResourceExhausted`] when the pool is at capacity.
    /// Rejection is immediate; the request is never queued.
    pub async fn create_connection(&self, client_id: &str) -> Result<Connection, PoolError> {
        let connection = Connection::new(client_id, DEFAULT_PROTOCOL, crate::infrastructure::now_ms());
        let id = connection.id;

        self.inner.pool.lock().await.add(connection.clone())?;
        self.inner.attempts.lock().await.insert(id, 0);
        self.inner.health.lock().await.start(id);

        info!(connection_id = %id, client_id, "connection created");
        self.inner.emit(ConnectionEvent::Created {
            connection: connection.clone(),
        });
        self.inner.emit(ConnectionEvent::Added { connection_id: id });
        Ok(connection)
    }

    /// Attaches the transport the protocol layer opened for this link.
    pub async fn attach_transport(&self, id: ConnectionId, transport: Arc<dyn Transport>) {
        self.inner.transports.lock().await.insert(id, transport);
    }

    /// Routes a payload out through the connection's transport,
    /// recording outbound traffic metrics on success.
    pub async fn send(&self, id: ConnectionId, bytes: &[u8]) -> Result<(), SendError> {
        let transport = {
            let transports = self.inner.transports.lock().await;
            transports.get(&id).cloned()
        }
        .ok_or(SendError::NoTransport(id))?;

        transport.send(bytes).await?;
        self.record_bytes_out(id, bytes.len() as u64).await;
        self.record_message_out(id).await;
        Ok(())
    }

    /// Returns a snapshot of the connection.
    pub async fn get_connection(&self, id: ConnectionId) -> Result<Connection, PoolError> {
        self.inner
            .pool
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or(PoolError::NotFound(id))
    }

    /// Closes a logical link for good, bypassing reconnection.
    ///
    /// The pending reconnect timer and the health loop are both stopped
    /// before the pool entry is removed, so nothing can fire for this id
    /// after the call returns.
    pub async fn close_connection(&self, id: ConnectionId) -> Result<(), PoolError> {
        ManagerInner::cancel_reconnect_timer(&self.inner, id).await;
        self.inner.health.lock().await.stop(id);
        self.inner.attempts.lock().await.remove(&id);

        let removed = self.inner.pool.lock().await.remove(id);
        let transport = self.inner.transports.lock().await.remove(&id);

        if removed.is_none() {
            return Err(PoolError::NotFound(id));
        }
        if let Some(transport) = transport {
            transport.close().await;
        }

        info!(connection_id = %id, "connection closed");
        self.inner.emit(ConnectionEvent::Removed { connection_id: id });
        Ok(())
    }

    /// Marks the handshake complete: state `connected`, attempt counter
    /// reset, pending reconnect timer cancelled, health loop (re)armed.
    pub async fn mark_connected(&self, id: ConnectionId) -> Result<(), PoolError> {
        // Cancel the pending timer before flipping the state; a timer
        // firing after the flip would knock the link back to connecting.
        ManagerInner::cancel_reconnect_timer(&self.inner, id).await;

        let old = {
            let mut pool = self.inner.pool.lock().await;
            pool.set_state(id, ConnectionState::Connected, crate::infrastructure::now_ms())?
        };

        self.inner.attempts.lock().await.insert(id, 0);
        // The health loop exits when it declares a connection unhealthy;
        // a successful reconnection starts a fresh one.
        self.inner.health.lock().await.start(id);

        self.inner.emit(ConnectionEvent::StateChanged {
            connection_id: id,
            old_state: old,
            new_state: ConnectionState::Connected,
        });
        self.inner
            .emit(ConnectionEvent::Established { connection_id: id });
        Ok(())
    }

    /// Marks the transport gone: state `disconnected`, then schedules a
    /// reconnection attempt.
    pub async fn mark_disconnected(&self, id: ConnectionId) -> Result<(), PoolError> {
        let old = {
            let mut pool = self.inner.pool.lock().await;
            pool.set_state(id, ConnectionState::Disconnected, crate::infrastructure::now_ms())?
        };

        self.inner.emit(ConnectionEvent::StateChanged {
            connection_id: id,
            old_state: old,
            new_state: ConnectionState::Disconnected,
        });
        self.inner.emit(ConnectionEvent::Lost { connection_id: id });

        ManagerInner::schedule_reconnect(&self.inner, id).await;
        Ok(())
    }

    /// Merges a metrics update and fans it out.
    pub async fn update_metrics(
        &self,
        id: ConnectionId,
        update: MetricsUpdate,
    ) -> Result<(), PoolError> {
        let metrics = {
            let mut pool = self.inner.pool.lock().await;
            pool.update_metrics(id, &update, crate::infrastructure::now_ms())?;
            pool.get(id).map(|c| c.metrics.clone())
        };
        if let Some(metrics) = metrics {
            self.inner.emit(ConnectionEvent::MetricsUpdated {
                connection_id: id,
                metrics,
            });
        }
        Ok(())
    }

    pub async fn record_bytes_in(&self, id: ConnectionId, bytes: u64) {
        let now = crate::infrastructure::now_ms();
        let _ = self.inner.pool.lock().await.with_connection_mut(id, now, |c| {
            c.metrics.bytes_in += bytes;
        });
    }

    pub async fn record_bytes_out(&self, id: ConnectionId, bytes: u64) {
        let now = crate::infrastructure::now_ms();
        let _ = self.inner.pool.lock().await.with_connection_mut(id, now, |c| {
            c.metrics.bytes_out += bytes;
        });
    }

    pub async fn record_message_in(&self, id: ConnectionId) {
        let now = crate::infrastructure::now_ms();
        let _ = self.inner.pool.lock().await.with_connection_mut(id, now, |c| {
            c.metrics.messages_in += 1;
        });
    }

    pub async fn record_message_out(&self, id: ConnectionId) {
        let now = crate::infrastructure::now_ms();
        let _ = self.inner.pool.lock().await.with_connection_mut(id, now, |c| {
            c.metrics.messages_out += 1;
        });
    }

    /// Snapshot of connections currently in state `connected`.
    pub async fn active_connections(&self) -> Vec<Connection> {
        self.inner
            .pool
            .lock()
            .await
            .active()
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn pool_stats(&self) -> PoolStats {
        self.inner.pool.lock().await.stats()
    }

    /// Whether a reconnect timer is currently pending for this id.
    pub async fn has_pending_reconnect(&self, id: ConnectionId) -> bool {
        self.inner.reconnect_timers.lock().await.contains_key(&id)
    }
}

impl ManagerInner {
    /// Fans an event out to the consumer. Events are advisory; if the
    /// consumer cannot keep up the event is dropped, never the operation.
    fn emit(&self, event: ConnectionEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!("connection event dropped: {e}");
        }
    }

    async fn cancel_reconnect_timer(inner: &Arc<Self>, id: ConnectionId) {
        if let Some(handle) = inner.reconnect_timers.lock().await.remove(&id) {
            handle.abort();
        }
    }

    /// Health checker gave up on the connection: flag it and start the
    /// backoff schedule.
    async fn handle_unhealthy(inner: &Arc<Self>, id: ConnectionId) {
        let old = {
            let mut pool = inner.pool.lock().await;
            match pool.set_state(id, ConnectionState::Error, crate::infrastructure::now_ms()) {
                Ok(old) => old,
                // Already removed (manual close raced the probe); nothing to do.
                Err(_) => return,
            }
        };
        inner.emit(ConnectionEvent::StateChanged {
            connection_id: id,
            old_state: old,
            new_state: ConnectionState::Error,
        });
        Self::schedule_reconnect(inner, id).await;
    }

    /// Schedules the next reconnection attempt, or removes the
    /// connection when attempts are exhausted.
    async fn schedule_reconnect(inner: &Arc<Self>, id: ConnectionId) {
        let attempts_so_far = {
            let attempts = inner.attempts.lock().await;
            match attempts.get(&id) {
                Some(&n) => n,
                None => return, // closed concurrently
            }
        };

        if attempts_so_far >= inner.config.max_reconnect_attempts {
            warn!(
                connection_id = %id,
                attempts = attempts_so_far,
                "reconnection attempts exhausted, removing connection"
            );
            inner.health.lock().await.stop(id);
            inner.attempts.lock().await.remove(&id);
            inner.transports.lock().await.remove(&id);
            inner.pool.lock().await.remove(id);
            inner.emit(ConnectionEvent::ReconnectFailed {
                connection_id: id,
                attempts: attempts_so_far,
            });
            inner.emit(ConnectionEvent::Removed { connection_id: id });
            return;
        }

        let delay = backoff_delay(inner.config.reconnect_backoff, attempts_so_far);
        let attempt = attempts_so_far + 1;
        // Increment before scheduling so a crash between the two can only
        // under-retry, never over-retry.
        inner.attempts.lock().await.insert(id, attempt);

        inner.emit(ConnectionEvent::Reconnecting {
            connection_id: id,
            attempt,
            next_retry_in: delay,
        });
        debug!(connection_id = %id, attempt, ?delay, "reconnect scheduled");

        let timer_inner = Arc::clone(inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            timer_inner.reconnect_timers.lock().await.remove(&id);
            let old = {
                let mut pool = timer_inner.pool.lock().await;
                match pool.set_state(id, ConnectionState::Connecting, crate::infrastructure::now_ms())
                {
                    Ok(old) => old,
                    Err(_) => return,
                }
            };
            timer_inner.emit(ConnectionEvent::StateChanged {
                connection_id: id,
                old_state: old,
                new_state: ConnectionState::Connecting,
            });
            timer_inner.emit(ConnectionEvent::ReconnectAttempt {
                connection_id: id,
                attempt,
            });
        });

        // Replace (and cancel) any previous timer for this id.
        if let Some(previous) = inner.reconnect_timers.lock().await.insert(id, handle) {
            previous.abort();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
