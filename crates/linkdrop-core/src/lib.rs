//! # linkdrop-core
//!
//! Shared library for LinkDrop containing the discovery and file-transfer
//! wire formats plus the pure domain entities they describe.
//!
//! This crate is used by the desktop host and by any future peer-side
//! implementation. It has zero dependencies on OS APIs, sockets, or the
//! async runtime: everything in here is plain data and parsing, which is
//! what makes the protocol unit-testable without a network.
//!
//! Module map:
//!
//! - **`protocol`** – How bytes travel over the network. Discovery
//!   announcements exist in two encodings (JSON and a legacy
//!   colon-delimited line); file-transfer control messages are an
//!   action-tagged JSON envelope. Both are parsed into typed Rust enums
//!   so dispatch is exhaustive rather than stringly-typed.
//!
//! - **`domain`** – Pure state with no I/O: the [`DiscoveredDevice`]
//!   record kept per LAN peer, and the [`TransferSession`] record that
//!   tracks one file's chunked transfer progress.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `linkdrop_core::TransferSession` instead of the full path.
pub use domain::device::{DiscoveredDevice, Platform, ONLINE_THRESHOLD_MS, STALE_TIMEOUT_MS};
pub use domain::session::{ChunkSpan, TransferProgress, TransferSession, TransferStatus};
pub use protocol::discovery::{Announcement, AnnouncementError, DISCOVERY_PORT};
pub use protocol::transfer::{TransferErrorCode, TransferRequest, TransferResponse};
