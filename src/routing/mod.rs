//! Routing module: the server gateway and its building blocks

pub mod audit;
pub mod cache;
pub mod gateway;
pub mod load_balancer;
pub mod queue;
pub mod retry;
pub mod security;
pub mod types;

pub use audit::AuditLogger;
pub use cache::{cache_key, is_cacheable, CacheEntry, CacheStats, ResponseCache};
pub use gateway::{AvailableServices, CacheConfigUpdate, GatewayConfigUpdate, GatewayStats, ServerGateway};
pub use load_balancer::{Candidate, LoadBalancer, LoadBalancingAlgorithm};
pub use queue::{QueuedRequest, Rejected, RequestQueue};
pub use retry::{RetryExecutor, RetryPolicy};
pub use security::{method_matches, SecurityPolicy};
pub use types::*;
