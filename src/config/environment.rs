//! Environment variable integration for gateway configuration

use crate::config::{Config, LoadBalancingStrategy};
use crate::error::{GatewayError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::env;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Environment variable names used by the gateway
pub struct EnvVars;

impl EnvVars {
    pub const ENVIRONMENT: &'static str = "MCP_GATEWAY_ENV";
    pub const CONFIG_PATH: &'static str = "MCP_GATEWAY_CONFIG";
    pub const LOG_LEVEL: &'static str = "MCP_GATEWAY_LOG_LEVEL";
    pub const STRATEGY: &'static str = "MCP_GATEWAY_STRATEGY";
    pub const CACHE_ENABLED: &'static str = "MCP_GATEWAY_CACHE_ENABLED";
}

/// Environment configuration overrides
#[derive(Debug, Clone, Default)]
pub struct EnvironmentOverrides {
    pub config_path: Option<PathBuf>,
    pub log_level: Option<String>,
    pub strategy: Option<LoadBalancingStrategy>,
    pub cache_enabled: Option<bool>,
}

impl EnvironmentOverrides {
    /// Load environment variable overrides
    pub fn load() -> Result<Self> {
        let mut overrides = EnvironmentOverrides::default();

        if let Ok(path_str) = env::var(EnvVars::CONFIG_PATH) {
            let path = PathBuf::from(path_str);
            debug!("Environment override: {}={:?}", EnvVars::CONFIG_PATH, path);
            overrides.config_path = Some(path);
        }

        if let Ok(level) = env::var(EnvVars::LOG_LEVEL) {
            if !level.is_empty() {
                overrides.log_level = Some(level);
            }
        }

        if let Ok(strategy_str) = env::var(EnvVars::STRATEGY) {
            match strategy_str.parse::<LoadBalancingStrategy>() {
                Ok(strategy) => {
                    debug!("Environment override: {}={}", EnvVars::STRATEGY, strategy);
                    overrides.strategy = Some(strategy);
                }
                Err(e) => {
                    warn!("Invalid {}: {} ({})", EnvVars::STRATEGY, strategy_str, e);
                    return Err(GatewayError::config(format!(
                        "Invalid {}: {} (valid options: round-robin, least-connections, weighted, priority, capability-based)",
                        EnvVars::STRATEGY,
                        strategy_str
                    )));
                }
            }
        }

        if let Ok(cache_str) = env::var(EnvVars::CACHE_ENABLED) {
            overrides.cache_enabled = Some(parse_bool(EnvVars::CACHE_ENABLED, &cache_str)?);
        }

        Ok(overrides)
    }

    /// Apply environment overrides to a config
    pub fn apply_to_config(&self, config: &mut Config) {
        if let Some(ref level) = self.log_level {
            config.logging.level = level.clone();
        }

        if let Some(strategy) = self.strategy {
            let current = config.gateway.load_balancing.strategy;
            if current != strategy {
                info!("Environment override: strategy changed from {} to {}", current, strategy);
            }
            config.gateway.load_balancing.strategy = strategy;
        }

        if let Some(enabled) = self.cache_enabled {
            config.gateway.cache.enabled = enabled;
        }
    }

    /// Get the effective config file path (with environment override)
    pub fn get_config_path(&self, default_path: &std::path::Path) -> PathBuf {
        self.config_path
            .clone()
            .unwrap_or_else(|| default_path.to_path_buf())
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(GatewayError::config(format!(
            "Invalid {}: {} (valid options: true, false)",
            name, value
        ))),
    }
}

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("placeholder pattern is valid")
});

/// Expand `${VAR}` and `${VAR:-default}` placeholders against the process environment.
///
/// Unset variables without a default expand to the empty string; an empty
/// variable with a default takes the default.
pub fn expand_env_vars(input: &str) -> String {
    expand_with(input, |name| env::var(name).ok())
}

/// Placeholder expansion against an arbitrary lookup
pub fn expand_with<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    PLACEHOLDER
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let value = lookup(&caps[1]).filter(|v| !v.is_empty());
            match (value, caps.get(2)) {
                (Some(value), _) => value,
                (None, Some(default)) => default.as_str().to_string(),
                (None, None) => String::new(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(vars: &'a HashMap<&'a str, &'a str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| vars.get(name).map(|v| v.to_string())
    }

    #[test]
    fn test_expand_placeholders() {
        let vars = HashMap::from([("HOME", "/home/mcp"), ("EMPTY", "")]);
        assert_eq!(expand_with("${HOME}/data", lookup(&vars)), "/home/mcp/data");
        assert_eq!(expand_with("${MISSING:-fallback}", lookup(&vars)), "fallback");
        assert_eq!(expand_with("${EMPTY:-used}", lookup(&vars)), "used");
        assert_eq!(expand_with("x${MISSING}y", lookup(&vars)), "xy");
        assert_eq!(expand_with("${HOME:-/tmp}:${PORT:-8080}", lookup(&vars)), "/home/mcp:8080");
        assert_eq!(expand_with("no placeholders", lookup(&vars)), "no placeholders");
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = Config::default();
        let overrides = EnvironmentOverrides {
            strategy: Some(LoadBalancingStrategy::Weighted),
            cache_enabled: Some(false),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };
        overrides.apply_to_config(&mut config);
        assert_eq!(config.gateway.load_balancing.strategy, LoadBalancingStrategy::Weighted);
        assert!(!config.gateway.cache.enabled);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("X", "on").unwrap());
        assert!(!parse_bool("X", "0").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }
}
