//! Discovered-device domain entity.
//!
//! Every LAN peer that announces itself over UDP becomes a
//! [`DiscoveredDevice`] record. Records are keyed by the device id the
//! peer advertised, falling back to the sender's IP address when the
//! legacy announcement format omitted one. Timestamps are kept as
//! milliseconds since the Unix epoch so the entity stays serializable
//! and testable without `Instant` plumbing.

use serde::{Deserialize, Serialize};

/// A device is "online" while its last announcement is younger than this.
pub const ONLINE_THRESHOLD_MS: u64 = 30_000;

/// A device not seen for longer than this is evicted by the stale sweep.
pub const STALE_TIMEOUT_MS: u64 = 5 * 60 * 1_000;

/// Which side of the desktop↔mobile pairing a device is on.
///
/// Each side only registers peers of the *opposite* platform; a desktop
/// host hearing another desktop's broadcast ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Android,
}

impl Platform {
    /// The platform this side pairs with.
    pub fn opposite(self) -> Platform {
        match self {
            Platform::Windows => Platform::Android,
            Platform::Android => Platform::Windows,
        }
    }

    /// Prefix used by the legacy colon-delimited announcement line.
    pub fn legacy_prefix(self) -> &'static str {
        match self {
            Platform::Windows => "WINDOWS_DEVICE",
            Platform::Android => "ANDROID_DEVICE",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Windows => write!(f, "windows"),
            Platform::Android => write!(f, "android"),
        }
    }
}

/// A peer discovered via UDP announcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredDevice {
    /// Identifier advertised by the peer; sender IP when absent.
    pub device_id: String,
    pub device_name: String,
    pub ip: String,
    pub port: u16,
    pub platform: Platform,
    /// Free-form capability tags (e.g. `file_transfer`, `clipboard_sync`).
    pub capabilities: Vec<String>,
    pub version: String,
    /// When the device was first sighted (Unix millis).
    pub discovery_time: u64,
    /// When the device last announced itself (Unix millis).
    pub last_seen: u64,
}

impl DiscoveredDevice {
    /// Returns `true` while the device's last announcement is recent
    /// enough to show it as online.
    pub fn is_online(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_seen) < ONLINE_THRESHOLD_MS
    }

    /// Returns `true` once the device has gone unseen long enough for
    /// the sweep to evict it.
    pub fn is_stale(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_seen) > STALE_TIMEOUT_MS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_device(last_seen: u64) -> DiscoveredDevice {
        DiscoveredDevice {
            device_id: "abc".to_string(),
            device_name: "Phone".to_string(),
            ip: "192.168.1.50".to_string(),
            port: 8190,
            platform: Platform::Android,
            capabilities: vec!["file_transfer".to_string()],
            version: "1.0.0".to_string(),
            discovery_time: last_seen,
            last_seen,
        }
    }

    #[test]
    fn test_device_is_online_within_threshold() {
        let d = make_device(100_000);
        assert!(d.is_online(100_000 + ONLINE_THRESHOLD_MS - 1));
    }

    #[test]
    fn test_device_is_offline_at_threshold() {
        let d = make_device(100_000);
        assert!(!d.is_online(100_000 + ONLINE_THRESHOLD_MS));
    }

    #[test]
    fn test_device_is_not_stale_at_exactly_the_timeout() {
        // Purged iff now - last_seen > stale timeout, strictly greater.
        let d = make_device(100_000);
        assert!(!d.is_stale(100_000 + STALE_TIMEOUT_MS));
        assert!(d.is_stale(100_000 + STALE_TIMEOUT_MS + 1));
    }

    #[test]
    fn test_online_window_is_narrower_than_stale_window() {
        let d = make_device(0);
        let t = ONLINE_THRESHOLD_MS + 1;
        assert!(!d.is_online(t));
        assert!(!d.is_stale(t));
    }

    #[test]
    fn test_platform_opposite_is_symmetric() {
        assert_eq!(Platform::Windows.opposite(), Platform::Android);
        assert_eq!(Platform::Android.opposite(), Platform::Windows);
    }

    #[test]
    fn test_platform_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Platform::Android).unwrap(),
            "\"android\""
        );
    }
}
