//! Discovery announcement codec.
//!
//! Peers announce themselves by UDP broadcast on [`DISCOVERY_PORT`].
//! Two encodings exist on the wire and both must be accepted:
//!
//! 1. **JSON** (preferred):
//!    ```json
//!    {"type":"device_discovery","platform":"android","deviceId":"abc",
//!     "deviceName":"Phone","version":"1.0.0",
//!     "capabilities":["file_transfer"],"timestamp":1700000000000}
//!    ```
//!    Any well-formed JSON whose `type` is not `device_discovery` is
//!    ignored (it may belong to another protocol sharing the port).
//!
//! 2. **Legacy line** (older peers):
//!    `"ANDROID_DEVICE:<id>:<name>[:<version>]"` or the
//!    `WINDOWS_DEVICE` equivalent. Fewer than three colon-separated
//!    fields is a malformed message, logged by the caller and dropped.
//!
//! Parse order matters: JSON is tried first, and the legacy form is only
//! attempted when the datagram is not valid JSON at all. The encode side
//! emits *both* forms for every broadcast so old and new peers hear us.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::device::Platform;

/// Well-known UDP discovery port.
pub const DISCOVERY_PORT: u16 = 8190;

/// Version advertised when a legacy announcement omits the field.
const DEFAULT_VERSION: &str = "1.0.0";

/// Errors produced while parsing an inbound announcement datagram.
#[derive(Debug, Error, PartialEq)]
pub enum AnnouncementError {
    /// The datagram is not valid UTF-8, so it is neither encoding.
    #[error("announcement is not valid UTF-8")]
    NotUtf8,

    /// Valid JSON, but not a `device_discovery` message (unknown `type`
    /// or missing fields). Dropped quietly since the port is shared.
    #[error("unrecognised JSON discovery message: {0}")]
    UnknownJson(String),

    /// Not JSON and not prefixed by a known `<ROLE>_DEVICE` tag.
    #[error("datagram is not a discovery announcement")]
    NotAnAnnouncement,

    /// A legacy line with fewer than three colon-separated fields.
    #[error("malformed legacy announcement ({fields} fields, need at least 3)")]
    MalformedLegacy { fields: usize },
}

/// A parsed self-announcement, independent of which encoding carried it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub platform: Platform,
    pub device_id: String,
    pub device_name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Sender clock, Unix millis. Informational; receivers key staleness
    /// off their own clock.
    #[serde(default)]
    pub timestamp: u64,
}

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

/// Envelope distinguishing discovery messages from anything else that
/// may arrive on the shared port. Adding a message kind here is a
/// compile-time-checked change for every consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DiscoveryMessage {
    DeviceDiscovery(Announcement),
}

/// Parses an inbound datagram, trying JSON first and the legacy line
/// only when the payload is not JSON at all.
///
/// # Errors
///
/// See [`AnnouncementError`]; callers log and drop, never tear anything
/// down over a bad datagram.
pub fn parse_announcement(datagram: &[u8]) -> Result<Announcement, AnnouncementError> {
    let text = std::str::from_utf8(datagram).map_err(|_| AnnouncementError::NotUtf8)?;

    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => serde_json::from_value::<DiscoveryMessage>(value)
            .map(|DiscoveryMessage::DeviceDiscovery(a)| a)
            .map_err(|e| AnnouncementError::UnknownJson(e.to_string())),
        Err(_) => parse_legacy(text),
    }
}

/// Parses the legacy `<ROLE>_DEVICE:id:name[:version]` line.
fn parse_legacy(line: &str) -> Result<Announcement, AnnouncementError> {
    let parts: Vec<&str> = line.split(':').collect();

    let platform = if parts[0] == Platform::Android.legacy_prefix() {
        Platform::Android
    } else if parts[0] == Platform::Windows.legacy_prefix() {
        Platform::Windows
    } else {
        return Err(AnnouncementError::NotAnAnnouncement);
    };

    if parts.len() < 3 {
        return Err(AnnouncementError::MalformedLegacy {
            fields: parts.len(),
        });
    }

    Ok(Announcement {
        platform,
        device_id: parts[1].to_string(),
        device_name: parts[2].to_string(),
        version: parts
            .get(3)
            .map_or_else(default_version, |v| (*v).to_string()),
        capabilities: Vec::new(),
        timestamp: 0,
    })
}

/// Encodes the JSON form of an announcement.
pub fn encode_json(announcement: &Announcement) -> String {
    // Serialization of a plain struct-of-strings cannot fail.
    serde_json::to_string(&DiscoveryMessage::DeviceDiscovery(announcement.clone()))
        .unwrap_or_default()
}

/// Encodes the legacy line form of an announcement.
pub fn encode_legacy(announcement: &Announcement) -> String {
    format!(
        "{}:{}:{}:{}",
        announcement.platform.legacy_prefix(),
        announcement.device_id,
        announcement.device_name,
        announcement.version
    )
}

/// Both wire encodings for one broadcast cycle, legacy first in the
/// order old peers expect.
pub fn broadcast_payloads(announcement: &Announcement) -> [String; 2] {
    [encode_legacy(announcement), encode_json(announcement)]
}

// ── Tests ─────────────────────────────────────────────────────────────────────
