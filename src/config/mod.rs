//! Configuration module for the MCP Gateway
//!
//! This module provides configuration types, loading, environment overrides
//! and validation.

mod config;
pub mod environment;
pub mod validator;

// Re-export the main configuration types
pub use config::{
    AlertThresholds, AlertingConfig, BackoffStrategy, CacheConfig, CircuitBreakerConfig, Config,
    ConnectionPoolConfig, EmailConfig, EvictionPolicy, GatewayConfig, GatewayRetryConfig,
    LoadBalancingConfig, LoadBalancingStrategy, LoggingConfig, MonitoringConfig, QueueConfig,
    RateLimitConfig, RetentionConfig, SecurityConfig, ServerConfig, ServerPolicy, WebhookConfig,
};
pub use environment::{expand_env_vars, EnvVars, EnvironmentOverrides};
pub use validator::{ConfigValidator, ValidationResult};
