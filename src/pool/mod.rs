//! Connection pooling for backend MCP servers
//!
//! One pool per configured server; each connection carries its own circuit
//! breaker and sliding-window rate limiter.

pub mod circuit_breaker;
pub mod connection;
pub mod health_checker;
pub mod manager;
pub mod rate_limiter;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerSnapshot, CircuitState, CircuitTransition};
pub use connection::{Connection, ConnectionInfo, ConnectionMetrics, ConnectionState};
pub use health_checker::{ConnectionHealthChecker, HealthCheckResult};
pub use manager::{ConnectionLease, ConnectionManager, PoolStats, RequestOptions, RequestOutcome};
pub use rate_limiter::SlidingWindowRateLimiter;
