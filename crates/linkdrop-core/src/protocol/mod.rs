//! Wire formats for LinkDrop.
//!
//! Two independent protocols live here:
//!
//! - `discovery` – the UDP self-announcement, accepted in two encodings
//!   (JSON preferred, legacy colon-delimited fallback).
//! - `transfer` – the action-tagged JSON control envelope used by the
//!   message-oriented file-transfer transport.

pub mod discovery;
pub mod transfer;
