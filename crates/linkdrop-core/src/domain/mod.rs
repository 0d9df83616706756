//! Pure domain entities shared by the host and any peer implementation.

pub mod device;
pub mod session;
