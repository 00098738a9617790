//! Configuration validation

use crate::config::Config;
use tracing::debug;

/// Configuration validation result
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the full configuration
    pub fn validate(config: &Config) -> ValidationResult {
        debug!("Validating gateway configuration");

        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let pool = &config.connection_pool;
        if pool.max_connections == 0 {
            errors.push("connectionPool.maxConnections must be at least 1".to_string());
        }
        if pool.min_connections > pool.max_connections {
            errors.push(format!(
                "connectionPool.minConnections ({}) exceeds maxConnections ({})",
                pool.min_connections, pool.max_connections
            ));
        }
        if pool.connection_timeout == 0 {
            errors.push("connectionPool.connectionTimeout cannot be zero".to_string());
        }
        if pool.health_check_interval == 0 {
            errors.push("connectionPool.healthCheckInterval cannot be zero".to_string());
        }

        for (name, server) in &config.mcp_servers {
            if server.command.trim().is_empty() {
                errors.push(format!("mcpServers.{}.command cannot be empty", name));
            }
            let policy = &server.config;
            if policy.timeout == 0 {
                errors.push(format!("mcpServers.{}.config.timeout cannot be zero", name));
            }
            if policy.circuit_breaker.failure_threshold == 0 {
                errors.push(format!(
                    "mcpServers.{}.config.circuitBreaker.failureThreshold must be at least 1",
                    name
                ));
            }
            if policy.rate_limit.requests == 0 || policy.rate_limit.window == 0 {
                errors.push(format!(
                    "mcpServers.{}.config.rateLimit requires non-zero requests and window",
                    name
                ));
            }
            if server.capabilities.is_empty() && policy.category.is_none() {
                warnings.push(format!(
                    "mcpServers.{} declares no capabilities or category and will never be routed to",
                    name
                ));
            }
        }

        for weighted in config.gateway.load_balancing.weights.keys() {
            if !config.mcp_servers.contains_key(weighted) {
                warnings.push(format!(
                    "gateway.loadBalancing.weights references unknown server '{}'",
                    weighted
                ));
            }
        }

        let cache = &config.gateway.cache;
        if cache.enabled && cache.max_size == 0 {
            errors.push("gateway.cache.maxSize must be at least 1 when caching is enabled".to_string());
        }
        if config.gateway.retry.max_attempts == 0 {
            errors.push("gateway.retry.maxAttempts must be at least 1".to_string());
        }
        if config.gateway.queue.batch_size == 0 {
            errors.push("gateway.queue.batchSize must be at least 1".to_string());
        }

        let thresholds = &config.monitoring.thresholds;
        for (field, value) in [
            ("errorRate", thresholds.error_rate),
            ("availabilityRate", thresholds.availability_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                errors.push(format!("monitoring.thresholds.{} must be within [0, 1]", field));
            }
        }

        if config.mcp_servers.is_empty() {
            warnings.push("No MCP servers configured".to_string());
        }

        ValidationResult {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}
