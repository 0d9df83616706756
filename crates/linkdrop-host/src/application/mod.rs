//! Application layer: use-cases wiring discovery to connection
//! management.

pub mod link_control;
