//! Cross-format interop tests for the discovery and transfer protocols.
//!
//! Discovery speaks two encodings at once (the JSON `device_discovery`
//! object and the legacy colon-separated string) because older mobile
//! builds only understand the latter. These tests pin down that a
//! receiver of either generation can parse what we broadcast, and that
//! the parser classifies foreign traffic on the shared UDP port without
//! misreading it as a peer.

use linkdrop_core::protocol::discovery::{
    broadcast_payloads, encode_json, encode_legacy, parse_announcement, Announcement,
    AnnouncementError,
};
use linkdrop_core::protocol::transfer::{parse_request, TransferRequest};
use linkdrop_core::Platform;

fn sample_announcement() -> Announcement {
    Announcement {
        platform: Platform::Windows,
        device_id: "desk-42".to_string(),
        device_name: "Office PC".to_string(),
        version: "2.1.0".to_string(),
        capabilities: vec!["file_transfer".to_string()],
        timestamp: 1_700_000_000_000,
    }
}

// ── Dual-format broadcast ─────────────────────────────────────────────────────

/// Both payloads of one broadcast cycle must parse back to the same
/// identity, whichever generation of peer receives them.
#[test]
fn test_both_broadcast_payloads_parse_to_same_identity() {
    let announcement = sample_announcement();
    let [legacy, json] = broadcast_payloads(&announcement);

    let from_legacy = parse_announcement(legacy.as_bytes()).unwrap();
    let from_json = parse_announcement(json.as_bytes()).unwrap();

    assert_eq!(from_legacy.device_id, "desk-42");
    assert_eq!(from_json.device_id, "desk-42");
    assert_eq!(from_legacy.platform, Platform::Windows);
    assert_eq!(from_json.platform, Platform::Windows);
    assert_eq!(from_legacy.device_name, from_json.device_name);
}

#[test]
fn test_json_encoding_is_tagged_device_discovery() {
    let json = encode_json(&sample_announcement());
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["type"], "device_discovery");
    assert_eq!(value["deviceId"], "desk-42");
}

#[test]
fn test_legacy_encoding_uses_platform_prefix() {
    let legacy = encode_legacy(&sample_announcement());
    assert!(legacy.starts_with("WINDOWS_DEVICE:"));
    assert_eq!(legacy, "WINDOWS_DEVICE:desk-42:Office PC:2.1.0");
}

/// An announcement from a peer that omits optional JSON fields still
/// parses, with defaults filled in.
#[test]
fn test_minimal_json_announcement_gets_defaults() {
    let raw = r#"{"type":"device_discovery","platform":"android",
                  "deviceId":"phone-1","deviceName":"Pixel"}"#;
    let announcement = parse_announcement(raw.as_bytes()).unwrap();
    assert_eq!(announcement.version, "1.0.0");
    assert!(announcement.capabilities.is_empty());
}

/// Two-field legacy strings (no version) come from the oldest builds
/// and must still parse; one-field strings are malformed.
#[test]
fn test_legacy_version_field_is_optional_but_name_is_not() {
    let announcement = parse_announcement(b"ANDROID_DEVICE:abc:Phone").unwrap();
    assert_eq!(announcement.device_id, "abc");
    assert_eq!(announcement.device_name, "Phone");

    assert!(matches!(
        parse_announcement(b"ANDROID_DEVICE:abc"),
        Err(AnnouncementError::MalformedLegacy { fields: 2 })
    ));
}

// ── Foreign traffic on the shared port ────────────────────────────────────────

#[test]
fn test_unrelated_json_is_not_an_announcement() {
    let raw = r#"{"type":"mdns_probe","host":"printer.local"}"#;
    assert!(matches!(
        parse_announcement(raw.as_bytes()),
        Err(AnnouncementError::UnknownJson(_))
    ));
}

#[test]
fn test_unrelated_text_and_binary_are_rejected() {
    assert!(matches!(
        parse_announcement(b"SSDP NOTIFY * HTTP/1.1"),
        Err(AnnouncementError::NotAnAnnouncement)
    ));
    assert!(matches!(
        parse_announcement(&[0xff, 0xfe, 0x00, 0x01]),
        Err(AnnouncementError::NotUtf8)
    ));
}

// ── Transfer envelope interop ─────────────────────────────────────────────────

/// A transfer request serialized by one side must parse identically on
/// the other, with optional fields surviving the trip.
#[test]
fn test_transfer_request_cross_parses() {
    let request = TransferRequest::Request {
        transfer_id: "t-1".to_string(),
        file_name: "photo.jpg".to_string(),
        file_size: 1_048_576,
        checksum: Some("cafebabe".to_string()),
    };
    let wire = serde_json::to_string(&request).unwrap();
    assert!(wire.contains("\"action\":\"request\""));
    assert!(wire.contains("\"fileName\":\"photo.jpg\""));
    assert_eq!(parse_request(&wire).unwrap(), request);
}
