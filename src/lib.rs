//! MCP Gateway - pooled, load-balanced access to a fleet of MCP servers
//!
//! This crate fronts independently spawned stdio MCP servers with a
//! connection pool per server (circuit breaking, rate limiting, health
//! checks and restarts), a routing gateway (security policy, response cache,
//! load-balancing strategies, retry with backoff) and a monitoring service
//! that derives server health and raises deduplicated alerts.

pub mod config;
pub mod error;
pub mod events;
pub mod mcp;
pub mod monitoring;
pub mod pool;
pub mod registry;
pub mod routing;
pub mod startup;
pub mod testing;
pub mod utils;

pub use config::Config;
pub use error::{GatewayError, Result};
pub use events::{EventBus, EventObserver, GatewayEvent};
pub use pool::ConnectionManager;
pub use routing::{ExecuteOptions, McpRequestContext, Response, ServerGateway};
pub use startup::GatewayRuntime;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "mcp-gateway.json";
