//! Criterion benchmarks for the discovery announcement codec.
//!
//! The host parses every datagram that arrives on the discovery port,
//! including other peers' chatter, so parse cost bounds how busy a LAN
//! segment the service tolerates.
//!
//! Run with:
//! ```bash
//! cargo bench --package linkdrop-core --bench announce_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use linkdrop_core::domain::device::Platform;
use linkdrop_core::protocol::discovery::{
    broadcast_payloads, parse_announcement, Announcement,
};

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn make_announcement() -> Announcement {
    Announcement {
        platform: Platform::Android,
        device_id: "android-3f2c".to_string(),
        device_name: "Pixel 8".to_string(),
        version: "1.0.0".to_string(),
        capabilities: vec![
            "file_transfer".to_string(),
            "screen_mirror".to_string(),
            "remote_control".to_string(),
            "notification".to_string(),
            "clipboard_sync".to_string(),
        ],
        timestamp: 1_700_000_000_000,
    }
}

fn bench_parse(c: &mut Criterion) {
    let [legacy, json] = broadcast_payloads(&make_announcement());

    c.bench_function("parse_announcement/json", |b| {
        b.iter(|| parse_announcement(black_box(json.as_bytes())))
    });

    c.bench_function("parse_announcement/legacy", |b| {
        b.iter(|| parse_announcement(black_box(legacy.as_bytes())))
    });

    // Worst case: non-JSON junk walks both parse paths before failing.
    c.bench_function("parse_announcement/garbage", |b| {
        b.iter(|| parse_announcement(black_box(b"mdns? definitely not ours")))
    });
}

fn bench_encode(c: &mut Criterion) {
    let ann = make_announcement();
    c.bench_function("broadcast_payloads", |b| {
        b.iter(|| broadcast_payloads(black_box(&ann)))
    });
}

criterion_group!(benches, bench_parse, bench_encode);
criterion_main!(benches);
