//! Persistence: TOML configuration storage.

pub mod config;
