//! Configuration management for the MCP Gateway

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

fn default_priority() -> i32 { 1 }
fn default_timeout() -> u64 { 30_000 }
fn default_retry_attempts() -> u32 { 3 }
fn default_retry_delay() -> u64 { 1_000 }
fn default_health_check_interval() -> u64 { 30_000 }
fn default_failure_threshold() -> u32 { 5 }
fn default_reset_timeout() -> u64 { 60_000 }
fn default_rate_limit_requests() -> u32 { 100 }
fn default_rate_limit_window() -> u64 { 60_000 }

/// Main configuration structure
///
/// Mirrors the JSON file layout: `mcpServers` plus the global
/// `connectionPool`, `gateway`, `monitoring`, `security` and `logging` blocks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Backend MCP servers keyed by name
    pub mcp_servers: BTreeMap<String, ServerConfig>,
    /// Connection pool sizing and timing
    pub connection_pool: ConnectionPoolConfig,
    /// Gateway routing, caching, retry and queue behaviour
    pub gateway: GatewayConfig,
    /// Monitoring, alerting and retention
    pub monitoring: MonitoringConfig,
    /// Method-level security policy
    pub security: SecurityConfig,
    /// Process logging
    pub logging: LoggingConfig,
}

/// How to start a backend server plus its policy block
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Command to execute (e.g., "npx", "uv", "python")
    pub command: String,
    /// Arguments to pass to the command
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables for the process (`${VAR:-default}` placeholders allowed)
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the process
    #[serde(default)]
    pub cwd: Option<String>,
    /// Methods or method prefixes this server declares
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Policy block
    #[serde(default)]
    pub config: ServerPolicy,
}

impl ServerConfig {
    /// Minimal config used by tests and programmatic setups
    pub fn new<S: Into<String>>(command: S) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            capabilities: Vec::new(),
            config: ServerPolicy::default(),
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_policy(mut self, policy: ServerPolicy) -> Self {
        self.config = policy;
        self
    }
}

/// Per-server policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerPolicy {
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Per-attempt request timeout (ms)
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Base delay between connection-level retries (ms)
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
    /// Health probe period (ms)
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval: u64,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub critical: bool,
}

impl Default for ServerPolicy {
    fn default() -> Self {
        Self {
            priority: default_priority(),
            timeout: default_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_delay: default_retry_delay(),
            health_check_interval: default_health_check_interval(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            category: None,
            critical: false,
        }
    }
}

impl ServerPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay)
    }
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Cooldown before a half-open trial (ms)
    #[serde(default = "default_reset_timeout")]
    pub reset_timeout: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout: default_reset_timeout(),
        }
    }
}

/// Sliding-window rate limit per connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Requests allowed per window
    #[serde(default = "default_rate_limit_requests")]
    pub requests: u32,
    /// Window length (ms)
    #[serde(default = "default_rate_limit_window")]
    pub window: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: default_rate_limit_requests(),
            window: default_rate_limit_window(),
        }
    }
}

/// Connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionPoolConfig {
    pub min_connections: usize,
    pub max_connections: usize,
    /// How long `get_connection` waits for a slot (ms)
    pub connection_timeout: u64,
    /// Idle connections above the minimum are closed after this long (ms)
    pub idle_timeout: u64,
    /// Health check loop period (ms)
    pub health_check_interval: u64,
    /// Availability poll period while waiting for a connection (ms)
    pub poll_interval: u64,
    /// Upper bound on graceful shutdown (ms)
    pub shutdown_timeout: u64,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 5,
            connection_timeout: 10_000,
            idle_timeout: 300_000,
            health_check_interval: 30_000,
            poll_interval: 100,
            shutdown_timeout: 5_000,
        }
    }
}

impl ConnectionPoolConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval.max(1))
    }
}

/// Load balancing strategy used to choose among capable servers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalancingStrategy {
    RoundRobin,
    LeastConnections,
    Weighted,
    Priority,
    #[default]
    CapabilityBased,
}

impl std::fmt::Display for LoadBalancingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LoadBalancingStrategy::RoundRobin => "round-robin",
            LoadBalancingStrategy::LeastConnections => "least-connections",
            LoadBalancingStrategy::Weighted => "weighted",
            LoadBalancingStrategy::Priority => "priority",
            LoadBalancingStrategy::CapabilityBased => "capability-based",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for LoadBalancingStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "round-robin" => Ok(LoadBalancingStrategy::RoundRobin),
            "least-connections" => Ok(LoadBalancingStrategy::LeastConnections),
            "weighted" => Ok(LoadBalancingStrategy::Weighted),
            "priority" => Ok(LoadBalancingStrategy::Priority),
            "capability-based" => Ok(LoadBalancingStrategy::CapabilityBased),
            other => Err(format!("unknown load balancing strategy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoadBalancingConfig {
    pub strategy: LoadBalancingStrategy,
    /// Per-server weights for the weighted strategy (default 1)
    pub weights: HashMap<String, u32>,
}

/// Cache eviction policy applied when the cache is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    #[default]
    Lru,
    Lfu,
    Fifo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Entry lifetime (ms)
    pub ttl: u64,
    pub max_size: usize,
    pub eviction_policy: EvictionPolicy,
    /// Expiry sweep period (ms)
    pub cleanup_interval: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: 300_000,
            max_size: 1_000,
            eviction_policy: EvictionPolicy::Lru,
            cleanup_interval: 60_000,
        }
    }
}

/// Backoff shape for gateway-level retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    #[default]
    Exponential,
    Linear,
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayRetryConfig {
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    /// First retry delay (ms)
    pub initial_delay: u64,
    /// Delay cap (ms)
    pub max_delay: u64,
}

impl Default for GatewayRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential,
            initial_delay: 1_000,
            max_delay: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueConfig {
    pub max_size: usize,
    /// Requests drained per tick
    pub batch_size: usize,
    /// Drain tick period (ms)
    pub interval: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 1_000,
            batch_size: 10,
            interval: 100,
        }
    }
}

/// Gateway behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub load_balancing: LoadBalancingConfig,
    pub cache: CacheConfig,
    pub retry: GatewayRetryConfig,
    pub queue: QueueConfig,
    /// Default request timeout when the caller does not set one (ms)
    pub request_timeout: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            load_balancing: LoadBalancingConfig::default(),
            cache: CacheConfig::default(),
            retry: GatewayRetryConfig::default(),
            queue: QueueConfig::default(),
            request_timeout: default_timeout(),
        }
    }
}

/// Retention windows, in days
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetentionConfig {
    pub metrics_days: u32,
    pub logs_days: u32,
    pub alerts_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            metrics_days: 7,
            logs_days: 30,
            alerts_days: 90,
        }
    }
}

/// Thresholds used for health derivation and alerting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertThresholds {
    /// Response time above which a server is degraded (ms)
    pub response_time: f64,
    /// Error rate above which a server is degraded
    pub error_rate: f64,
    /// Availability below which a server is degraded
    pub availability_rate: f64,
    /// Gateway process resident memory (MB)
    pub memory_usage_mb: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            response_time: 5_000.0,
            error_rate: 0.1,
            availability_rate: 0.95,
            memory_usage_mb: 1_024.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Request timeout (ms)
    #[serde(default = "default_webhook_timeout")]
    pub timeout: u64,
}

fn default_webhook_timeout() -> u64 { 5_000 }

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailConfig {
    pub from: String,
    pub to: Vec<String>,
    #[serde(default)]
    pub subject_prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertingConfig {
    pub enabled: bool,
    /// Suppress repeated (type, server) alerts within this window (ms)
    pub dedup_window: u64,
    pub webhook: Option<WebhookConfig>,
    pub email: Option<EmailConfig>,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dedup_window: 300_000,
            webhook: None,
            email: None,
        }
    }
}

/// Monitoring service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitoringConfig {
    pub enabled: bool,
    /// Emit monitoring log entries through tracing
    pub console: bool,
    /// Directory for per-day log files; file logging is off when unset
    pub log_dir: Option<String>,
    pub max_log_entries: usize,
    /// Trailing window used for health derivation (ms)
    pub health_window: u64,
    /// Threshold analysis period (ms)
    pub analysis_interval: u64,
    /// Retention cleanup period (ms)
    pub cleanup_interval: u64,
    pub retention: RetentionConfig,
    pub thresholds: AlertThresholds,
    pub alerting: AlertingConfig,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            console: true,
            log_dir: None,
            max_log_entries: 10_000,
            health_window: 300_000,
            analysis_interval: 60_000,
            cleanup_interval: 86_400_000,
            retention: RetentionConfig::default(),
            thresholds: AlertThresholds::default(),
            alerting: AlertingConfig::default(),
        }
    }
}

/// Method-level security policy enforced by the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityConfig {
    /// Methods that are always rejected (exact or `prefix.*`)
    pub blocked_methods: Vec<String>,
    /// When set, only these methods are accepted (exact or `prefix.*`)
    pub allowed_methods: Option<Vec<String>>,
    /// Require the caller context to carry a matching permission
    pub enforce_permissions: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            blocked_methods: Vec::new(),
            allowed_methods: None,
            enforce_permissions: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Config {
    /// Load .env files in order of precedence
    fn load_env_files() {
        let env = std::env::var(super::environment::EnvVars::ENVIRONMENT)
            .unwrap_or_else(|_| "development".to_string());

        let env_specific_file = format!(".env.{}", env);
        let env_files = [".env", env_specific_file.as_str(), ".env.local"];

        for env_file in env_files {
            match dotenvy::from_filename(env_file) {
                Ok(_) => {
                    tracing::info!("Loaded environment variables from {}", env_file);
                }
                Err(e) if e.not_found() => {
                    tracing::debug!("No {} file found, skipping", env_file);
                }
                Err(e) => {
                    tracing::warn!("Failed to load {}: {}", env_file, e);
                }
            }
        }
    }

    /// Parse configuration text; YAML when `yaml` is set, JSON otherwise
    pub fn from_str_with_format(content: &str, yaml: bool) -> Result<Self> {
        if yaml {
            Ok(serde_yaml::from_str(content)?)
        } else {
            serde_json::from_str(content)
                .map_err(|e| GatewayError::config(format!("Failed to parse config file: {}", e)))
        }
    }

    /// Load configuration from file, then apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_env_files();

        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| GatewayError::config(format!("Failed to read config file: {}", e)))?;
            let yaml = matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("yaml") | Some("yml")
            );
            Self::from_str_with_format(&content, yaml)?
        } else {
            tracing::warn!("Config file {:?} not found, using defaults", path);
            Self::default()
        };

        let overrides = super::environment::EnvironmentOverrides::load()?;
        overrides.apply_to_config(&mut config);

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration, failing on the first hard error
    pub fn validate(&self) -> Result<()> {
        let result = super::validator::ConfigValidator::validate(self);
        for warning in &result.warnings {
            tracing::warn!("Configuration warning: {}", warning);
        }
        if result.is_valid {
            Ok(())
        } else {
            Err(GatewayError::config(result.errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_config() {
        let json = r#"{
            "mcpServers": {
                "files": {
                    "command": "npx",
                    "args": ["-y", "@modelcontextprotocol/server-filesystem", "${HOME:-/tmp}"],
                    "env": {"TOKEN": "${FILES_TOKEN:-none}"},
                    "capabilities": ["file.read", "file.write"],
                    "config": {
                        "priority": 5,
                        "timeout": 2000,
                        "circuitBreaker": {"failureThreshold": 3, "resetTimeout": 1000},
                        "rateLimit": {"requests": 10, "window": 1000},
                        "category": "file",
                        "critical": true
                    }
                }
            },
            "connectionPool": {"minConnections": 1, "maxConnections": 3},
            "gateway": {
                "loadBalancing": {"strategy": "round-robin", "weights": {"files": 3}},
                "cache": {"ttl": 1000, "maxSize": 2, "evictionPolicy": "lfu"},
                "retry": {"maxAttempts": 2, "backoff": "linear"}
            },
            "security": {"blockedMethods": ["admin.*"]}
        }"#;

        let config = Config::from_str_with_format(json, false).unwrap();
        let files = &config.mcp_servers["files"];
        assert_eq!(files.config.priority, 5);
        assert_eq!(files.config.circuit_breaker.failure_threshold, 3);
        assert_eq!(files.config.rate_limit.window, 1000);
        assert_eq!(files.config.retry_attempts, 3);
        assert!(files.config.critical);
        assert_eq!(config.connection_pool.max_connections, 3);
        assert_eq!(config.connection_pool.connection_timeout, 10_000);
        assert_eq!(config.gateway.load_balancing.strategy, LoadBalancingStrategy::RoundRobin);
        assert_eq!(config.gateway.cache.eviction_policy, EvictionPolicy::Lfu);
        assert_eq!(config.gateway.retry.backoff, BackoffStrategy::Linear);
        assert_eq!(config.security.blocked_methods, vec!["admin.*".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml_config() {
        let yaml = r#"
mcpServers:
  search:
    command: python
    args: ["-m", "search_server"]
    config:
      category: search
gateway:
  loadBalancing:
    strategy: priority
"#;
        let config = Config::from_str_with_format(yaml, true).unwrap();
        assert_eq!(config.mcp_servers["search"].config.category.as_deref(), Some("search"));
        assert_eq!(config.gateway.load_balancing.strategy, LoadBalancingStrategy::Priority);
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("least_connections".parse::<LoadBalancingStrategy>().unwrap(), LoadBalancingStrategy::LeastConnections);
        assert_eq!("Weighted".parse::<LoadBalancingStrategy>().unwrap(), LoadBalancingStrategy::Weighted);
        assert!("fastest".parse::<LoadBalancingStrategy>().is_err());
        assert_eq!(LoadBalancingStrategy::CapabilityBased.to_string(), "capability-based");
    }
}
