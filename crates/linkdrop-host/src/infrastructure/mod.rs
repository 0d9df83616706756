//! Infrastructure layer: sockets, timers, file I/O, and config storage.

pub mod network;
pub mod storage;
pub mod transfer;

/// Current time as milliseconds since the Unix epoch.
///
/// Wall-clock millis are what both wire formats and the persisted
/// session records carry, so everything in this crate stamps with this.
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
