//! Integration tests for the connection manager lifecycle.
//!
//! # Purpose
//!
//! These tests exercise the `ConnectionManager` through its *public* API
//! in the same way that the application layer uses it. They verify:
//!
//! - The happy path: create, mark connected, observe the pool stats.
//! - Admission control: the pool rejects connections beyond capacity
//!   immediately instead of queueing.
//! - The reconnection machine: a failing health probe drives the
//!   connection through error state into a scheduled reconnect, backoff
//!   delays double per attempt, and a manual close cancels everything.
//!
//! # Reconnection flow
//!
//! ```text
//! Manager                          Health checker
//! ───────                          ──────────────
//! create_connection()
//! mark_connected()                 probe every interval
//!                                  3 consecutive failures
//!            ◄── Unhealthy ─────── loop exits
//! state → error
//! schedule reconnect (base · 2ⁿ, capped at 30 s)
//! timer fires → state → connecting
//! mark_connected() resets the attempt counter
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use linkdrop_host::infrastructure::network::health::HealthProbe;
use linkdrop_host::infrastructure::network::manager::{
    backoff_delay, ConnectionEvent, ConnectionManager, ManagerConfig, MAX_RECONNECT_DELAY,
};
use linkdrop_host::infrastructure::network::pool::{ConnectionState, PoolError};

/// Probe with a scripted fixed outcome.
struct FixedProbe(bool);

#[async_trait]
impl HealthProbe for FixedProbe {
    async fn check(&self, _id: uuid::Uuid) -> bool {
        self.0
    }
}

fn fast_config() -> ManagerConfig {
    ManagerConfig {
        max_connections: 4,
        connection_timeout: Duration::from_millis(50),
        health_check_interval: Duration::from_millis(10),
        reconnect_backoff: Duration::from_millis(10),
        max_reconnect_attempts: 5,
    }
}

// ── Admission and lifecycle ───────────────────────────────────────────────────

/// With `max_connections = 2`, the third create must fail immediately
/// with `ResourceExhausted` and leave the first two untouched.
#[tokio::test]
async fn test_third_connection_is_rejected_at_capacity_two() {
    let config = ManagerConfig {
        max_connections: 2,
        ..fast_config()
    };
    let (manager, _events) = ConnectionManager::new(config, Arc::new(FixedProbe(true)));

    let a = manager.create_connection("desktop").await.unwrap();
    let b = manager.create_connection("phone").await.unwrap();
    let err = manager.create_connection("tablet").await.unwrap_err();

    assert_eq!(err, PoolError::ResourceExhausted { capacity: 2 });
    let stats = manager.pool_stats().await;
    assert_eq!(stats.total, 2);
    assert!(manager.get_connection(a.id).await.is_ok());
    assert!(manager.get_connection(b.id).await.is_ok());

    // Closing one frees the slot for the next create.
    manager.close_connection(a.id).await.unwrap();
    assert!(manager.create_connection("tablet").await.is_ok());
}

#[tokio::test]
async fn test_connect_then_disconnect_walks_the_state_machine() {
    let (manager, _events) = ConnectionManager::new(fast_config(), Arc::new(FixedProbe(true)));
    let conn = manager.create_connection("phone").await.unwrap();
    assert_eq!(conn.state, ConnectionState::Connecting);

    manager.mark_connected(conn.id).await.unwrap();
    assert_eq!(
        manager.get_connection(conn.id).await.unwrap().state,
        ConnectionState::Connected
    );
    assert_eq!(manager.pool_stats().await.connected, 1);

    manager.mark_disconnected(conn.id).await.unwrap();
    assert_eq!(
        manager.get_connection(conn.id).await.unwrap().state,
        ConnectionState::Disconnected
    );

    // The direct disconnected → connected jump is forbidden; the
    // connection must re-enter through connecting.
    assert!(matches!(
        manager.mark_connected(conn.id).await,
        Err(PoolError::InvalidTransition { .. })
    ));
}

// ── Reconnection ──────────────────────────────────────────────────────────────

/// An always-failing probe must drive the connection into error state
/// and schedule a reconnect within the configured backoff.
#[tokio::test]
async fn test_unhealthy_probe_triggers_error_state_and_reconnect() {
    let (manager, mut events) =
        ConnectionManager::new(fast_config(), Arc::new(FixedProbe(false)));
    manager.start().await;

    let conn = manager.create_connection("phone").await.unwrap();
    manager.mark_connected(conn.id).await.unwrap();

    let mut saw_unhealthy = false;
    let mut saw_reconnect_attempt = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !saw_reconnect_attempt && tokio::time::Instant::now() < deadline {
        let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(500), events.recv()).await
        else {
            break;
        };
        match event {
            ConnectionEvent::Unhealthy { connection_id, failures } => {
                assert_eq!(connection_id, conn.id);
                assert_eq!(failures, 3);
                saw_unhealthy = true;
            }
            ConnectionEvent::ReconnectAttempt { connection_id, attempt } => {
                assert_eq!(connection_id, conn.id);
                assert_eq!(attempt, 1);
                saw_reconnect_attempt = true;
            }
            _ => {}
        }
    }

    assert!(saw_unhealthy, "three probe failures must declare unhealthy");
    assert!(saw_reconnect_attempt, "a reconnect must be scheduled");
    manager.shutdown().await;
}

/// Closing a connection with a pending reconnect timer must cancel the
/// timer; the connection stays gone afterwards.
#[tokio::test]
async fn test_close_cancels_pending_reconnect() {
    let (manager, _events) = ConnectionManager::new(fast_config(), Arc::new(FixedProbe(true)));
    let conn = manager.create_connection("phone").await.unwrap();
    manager.mark_connected(conn.id).await.unwrap();
    manager.mark_disconnected(conn.id).await.unwrap();
    assert!(manager.has_pending_reconnect(conn.id).await);

    manager.close_connection(conn.id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(matches!(
        manager.get_connection(conn.id).await,
        Err(PoolError::NotFound(_))
    ));
    assert_eq!(manager.pool_stats().await.total, 0);
}

/// Exhausting the attempt budget removes the connection and emits the
/// terminal `ReconnectFailed` event; nothing retries afterwards.
#[tokio::test]
async fn test_attempt_budget_exhaustion_is_terminal() {
    let config = ManagerConfig {
        max_reconnect_attempts: 0,
        ..fast_config()
    };
    let (manager, mut events) = ConnectionManager::new(config, Arc::new(FixedProbe(true)));
    let conn = manager.create_connection("phone").await.unwrap();
    manager.mark_connected(conn.id).await.unwrap();
    manager.mark_disconnected(conn.id).await.unwrap();

    let mut saw_terminal = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, ConnectionEvent::ReconnectFailed { .. }) {
            saw_terminal = true;
        }
    }
    assert!(saw_terminal);
    assert!(matches!(
        manager.get_connection(conn.id).await,
        Err(PoolError::NotFound(_))
    ));
}

// ── Backoff schedule ──────────────────────────────────────────────────────────

#[test]
fn test_backoff_schedule_doubles_and_caps() {
    let base = Duration::from_secs(1);
    assert_eq!(backoff_delay(base, 0), Duration::from_secs(1));
    assert_eq!(backoff_delay(base, 4), Duration::from_secs(16));
    assert_eq!(backoff_delay(base, 5), MAX_RECONNECT_DELAY);
    assert_eq!(backoff_delay(base, 29), MAX_RECONNECT_DELAY);
}
