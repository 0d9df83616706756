//! Connection pool: capacity-bounded store of logical connections.
//!
//! The pool is the single owner of every [`Connection`] record; state and
//! metrics are mutated only through pool methods, and the
//! [`ConnectionManager`](super::manager::ConnectionManager) serializes
//! all callers through its API. Admission control is immediate: adding
//! beyond `max_connections` fails with
//! [`PoolError::ResourceExhausted`] rather than queueing.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a logical connection, generated on creation.
pub type ConnectionId = Uuid;

/// Error type for pool operations.
#[derive(Debug, Error, PartialEq)]
pub enum PoolError {
    /// The pool is at capacity. The caller may retry later; the request
    /// is never buffered.
    #[error("connection pool exhausted ({capacity} connections)")]
    ResourceExhausted { capacity: usize },

    /// No connection with the given id exists in the pool.
    #[error("connection not found: {0}")]
    NotFound(ConnectionId),

    /// A `disconnected` connection cannot jump straight to `connected`;
    /// it must re-enter through `connecting`.
    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
}

/// Lifecycle state of a logical connection.
///
/// ```text
/// Connecting ──► Connected ──► Disconnected ─┐
///     ▲              │                       │
///     │              └──► Error ─────────────┤
///     └──────────── (reconnection) ◄─────────┘
/// ```
///
/// Removal from the pool is the terminal step, reached by manual close
/// or by exhausting reconnection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

/// Traffic counters and link-quality figures per connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionMetrics {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub messages_in: u64,
    pub messages_out: u64,
    pub latency_ms: f64,
    pub packet_loss: f64,
}

/// Partial metrics update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct MetricsUpdate {
    pub bytes_in: Option<u64>,
    pub bytes_out: Option<u64>,
    pub messages_in: Option<u64>,
    pub messages_out: Option<u64>,
    pub latency_ms: Option<f64>,
    pub packet_loss: Option<f64>,
}

impl ConnectionMetrics {
    fn apply(&mut self, update: &MetricsUpdate) {
        if let Some(v) = update.bytes_in {
            self.bytes_in = v;
        }
        if let Some(v) = update.bytes_out {
            self.bytes_out = v;
        }
        if let Some(v) = update.messages_in {
            self.messages_in = v;
        }
        if let Some(v) = update.messages_out {
            self.messages_out = v;
        }
        if let Some(v) = update.latency_ms {
            self.latency_ms = v;
        }
        if let Some(v) = update.packet_loss {
            self.packet_loss = v;
        }
    }
}

/// One logical host↔peer link, independent of its underlying transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub id: ConnectionId,
    /// Identity of the remote client this link serves.
    pub client_id: String,
    /// Transport tag supplied by whatever protocol layer opened the link.
    pub protocol: String,
    pub state: ConnectionState,
    pub metrics: ConnectionMetrics,
    /// Unix millis.
    pub created_at: u64,
    pub last_activity_at: u64,
}

impl Connection {
    pub fn new(client_id: impl Into<String>, protocol: impl Into<String>, now_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_id: client_id.into(),
            protocol: protocol.into(),
            state: ConnectionState::Connecting,
            metrics: ConnectionMetrics::default(),
            created_at: now_ms,
            last_activity_at: now_ms,
        }
    }
}

/// Per-state counts and utilization snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub connected: usize,
    pub connecting: usize,
    pub disconnected: usize,
    pub error: usize,
    pub capacity: usize,
    /// `connected / capacity`, in percent.
    pub utilization: f64,
}

/// Capacity-bounded connection store.
pub struct ConnectionPool {
    connections: HashMap<ConnectionId, Connection>,
    max_connections: usize,
}

impl ConnectionPool {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            max_connections,
        }
    }

    /// Admits a connection, enforcing the capacity invariant.
    ///
    /// # Errors
    ///
    /// [`PoolError::ResourceExhausted`] when the pool is full.
    pub fn add(&mut self, connection: Connection) -> Result<(), PoolError> {
        if self.connections.len() >= self.max_connections {
            return Err(PoolError::ResourceExhausted {
                capacity: self.max_connections,
            });
        }
        self.connections.insert(connection.id, connection);
        Ok(())
    }

    /// Removes and returns a connection; `None` if it was never here.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }

    pub fn available_slots(&self) -> usize {
        self.max_connections - self.connections.len()
    }

    /// All connection ids currently pooled.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    /// Connections currently in the `connected` state.
    pub fn active(&self) -> Vec<&Connection> {
        self.connections
            .values()
            .filter(|c| c.state == ConnectionState::Connected)
            .collect()
    }

    /// Moves a connection to `state`, returning the previous state.
    ///
    /// # Errors
    ///
    /// [`PoolError::NotFound`] for unknown ids;
    /// [`PoolError::InvalidTransition`] for `disconnected → connected`.
    pub fn set_state(
        &mut self,
        id: ConnectionId,
        state: ConnectionState,
        now_ms: u64,
    ) -> Result<ConnectionState, PoolError> {
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or(PoolError::NotFound(id))?;

        if connection.state == ConnectionState::Disconnected
            && state == ConnectionState::Connected
        {
            return Err(PoolError::InvalidTransition {
                from: connection.state,
                to: state,
            });
        }

        let old = connection.state;
        connection.state = state;
        connection.last_activity_at = now_ms;
        Ok(old)
    }

    /// Merges a partial metrics update into a connection.
    pub fn update_metrics(
        &mut self,
        id: ConnectionId,
        update: &MetricsUpdate,
        now_ms: u64,
    ) -> Result<(), PoolError> {
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or(PoolError::NotFound(id))?;
        connection.metrics.apply(update);
        connection.last_activity_at = now_ms;
        Ok(())
    }

    /// Applies `f` to a connection's record, bumping its activity stamp.
    /// Used by the manager's traffic recorders.
    pub fn with_connection_mut<R>(
        &mut self,
        id: ConnectionId,
        now_ms: u64,
        f: impl FnOnce(&mut Connection) -> R,
    ) -> Result<R, PoolError> {
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or(PoolError::NotFound(id))?;
        connection.last_activity_at = now_ms;
        Ok(f(connection))
    }

    /// Per-state counts and utilization.
    pub fn stats(&self) -> PoolStats {
        let count = |s: ConnectionState| self.connections.values().filter(|c| c.state == s).count();
        let connected = count(ConnectionState::Connected);
        PoolStats {
            total: self.connections.len(),
            connected,
            connecting: count(ConnectionState::Connecting),
            disconnected: count(ConnectionState::Disconnected),
            error: count(ConnectionState::Error),
            capacity: self.max_connections,
            utilization: if self.max_connections == 0 {
                0.0
            } else {
                connected as f64 / self.max_connections as f64 * 100.0
            },
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection() -> Connection {
        Connection::new("client-1", "websocket", 1_000)
    }

    #[test]
    fn test_add_within_capacity_succeeds() {
        let mut pool = ConnectionPool::new(2);
        assert!(pool.add(make_connection()).is_ok());
        assert!(pool.add(make_connection()).is_ok());
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_add_beyond_capacity_is_resource_exhausted() {
        let mut pool = ConnectionPool::new(2);
        pool.add(make_connection()).unwrap();
        pool.add(make_connection()).unwrap();
        let err = pool.add(make_connection()).unwrap_err();
        assert_eq!(err, PoolError::ResourceExhausted { capacity: 2 });
        // The failed admission must not have changed the pool.
        assert_eq!(pool.len(), 2);
        assert!(pool.is_full());
    }

    #[test]
    fn test_remove_frees_a_slot() {
        let mut pool = ConnectionPool::new(1);
        let conn = make_connection();
        let id = conn.id;
        pool.add(conn).unwrap();
        assert!(pool.is_full());
        assert!(pool.remove(id).is_some());
        assert_eq!(pool.available_slots(), 1);
        assert!(pool.remove(id).is_none());
    }

    #[test]
    fn test_set_state_returns_previous_state_and_bumps_activity() {
        let mut pool = ConnectionPool::new(4);
        let conn = make_connection();
        let id = conn.id;
        pool.add(conn).unwrap();

        let old = pool.set_state(id, ConnectionState::Connected, 5_000).unwrap();
        assert_eq!(old, ConnectionState::Connecting);
        let c = pool.get(id).unwrap();
        assert_eq!(c.state, ConnectionState::Connected);
        assert_eq!(c.last_activity_at, 5_000);
    }

    #[test]
    fn test_disconnected_cannot_jump_to_connected() {
        let mut pool = ConnectionPool::new(4);
        let conn = make_connection();
        let id = conn.id;
        pool.add(conn).unwrap();
        pool.set_state(id, ConnectionState::Connected, 2_000).unwrap();
        pool.set_state(id, ConnectionState::Disconnected, 3_000).unwrap();

        let err = pool
            .set_state(id, ConnectionState::Connected, 4_000)
            .unwrap_err();
        assert_eq!(
            err,
            PoolError::InvalidTransition {
                from: ConnectionState::Disconnected,
                to: ConnectionState::Connected,
            }
        );

        // Re-entering through Connecting is the sanctioned path.
        pool.set_state(id, ConnectionState::Connecting, 5_000).unwrap();
        pool.set_state(id, ConnectionState::Connected, 6_000).unwrap();
    }

    #[test]
    fn test_set_state_unknown_id_is_not_found() {
        let mut pool = ConnectionPool::new(4);
        let id = Uuid::new_v4();
        assert_eq!(
            pool.set_state(id, ConnectionState::Connected, 0),
            Err(PoolError::NotFound(id))
        );
    }

    #[test]
    fn test_update_metrics_merges_only_provided_fields() {
        let mut pool = ConnectionPool::new(4);
        let conn = make_connection();
        let id = conn.id;
        pool.add(conn).unwrap();

        pool.update_metrics(
            id,
            &MetricsUpdate {
                bytes_in: Some(512),
                latency_ms: Some(12.5),
                ..MetricsUpdate::default()
            },
            2_000,
        )
        .unwrap();

        let m = &pool.get(id).unwrap().metrics;
        assert_eq!(m.bytes_in, 512);
        assert_eq!(m.latency_ms, 12.5);
        assert_eq!(m.bytes_out, 0);
    }

    #[test]
    fn test_stats_counts_by_state_and_utilization() {
        let mut pool = ConnectionPool::new(4);
        let ids: Vec<ConnectionId> = (0..3)
            .map(|_| {
                let c = make_connection();
                let id = c.id;
                pool.add(c).unwrap();
                id
            })
            .collect();
        pool.set_state(ids[0], ConnectionState::Connected, 1).unwrap();
        pool.set_state(ids[1], ConnectionState::Connected, 1).unwrap();
        pool.set_state(ids[1], ConnectionState::Error, 2).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.connected, 1);
        assert_eq!(stats.connecting, 1);
        assert_eq!(stats.error, 1);
        assert_eq!(stats.disconnected, 0);
        assert_eq!(stats.capacity, 4);
        assert_eq!(stats.utilization, 25.0);
    }
}
