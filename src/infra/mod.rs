//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod geoip;
pub mod http;
pub mod memory;
pub mod origin;
pub mod peers;
pub mod redis_store;
pub mod telemetry;
