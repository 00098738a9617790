//! Server registry: configured backends, their capabilities and health

pub mod service;
pub mod types;

pub use service::{infer_category, method_prefix, method_segments, ServerRegistry, StaticServerRegistry};
pub use types::{capability_covers, HealthStatus, RegisteredServer};
