//! Network services: connection pool, health probing, reconnection, and
//! UDP device discovery.

pub mod discovery;
pub mod health;
pub mod manager;
pub mod pool;
