//! Resumable chunked file transfer: positional chunk I/O, session
//! management, and the JSON control-envelope adapter.

pub mod chunk_io;
pub mod envelope;
pub mod manager;

pub use manager::{TransferConfig, TransferError, TransferEvent, TransferManager};
