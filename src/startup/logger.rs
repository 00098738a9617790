//! Logging setup and startup information

use crate::config::{Config, ConfigValidator};
use crate::error::{GatewayError, Result};
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `level`. Output goes to stderr so stdio
/// mode keeps stdout for responses.
pub fn init_logging(level: &str, format: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if format.eq_ignore_ascii_case("json") {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };

    installed.map_err(|e| GatewayError::config(format!("Failed to initialize logging: {}", e)))
}

/// Startup logger for configuration and server information
pub struct StartupLogger;

impl StartupLogger {
    pub fn display_startup_info(config: &Config, config_path: &Path, version: &str) {
        info!("🚀 MCP Gateway v{} starting...", version);
        info!("");

        info!("📁 Configuration:");
        if config_path.exists() {
            info!("   Config file: {:?} ✅", config_path);
        } else {
            info!("   Config file: built-in defaults ({:?} not found)", config_path);
        }
        info!("   Load balancing: {}", config.gateway.load_balancing.strategy);
        info!(
            "   Cache: {} (ttl {}ms, max {} entries, {:?})",
            if config.gateway.cache.enabled { "enabled" } else { "disabled" },
            config.gateway.cache.ttl,
            config.gateway.cache.max_size,
            config.gateway.cache.eviction_policy
        );
        info!(
            "   Pool: {}..{} connections per server",
            config.connection_pool.min_connections, config.connection_pool.max_connections
        );
        info!("");

        info!("🎯 MCP Servers:");
        if config.mcp_servers.is_empty() {
            warn!("   ⚠️  No MCP servers configured");
        }
        for (name, server) in &config.mcp_servers {
            info!(
                "   {} {} ({} capabilities, priority {}{})",
                if server.config.critical { "⭐" } else { "✅" },
                name,
                server.capabilities.len(),
                server.config.priority,
                server
                    .config
                    .category
                    .as_deref()
                    .map(|c| format!(", category {}", c))
                    .unwrap_or_default()
            );
        }
        info!("");

        let validation = ConfigValidator::validate(config);
        info!("📊 Validation Results:");
        if validation.errors.is_empty() && validation.warnings.is_empty() {
            info!("   ✨ No issues found");
        }
        for error in &validation.errors {
            warn!("   ❌ {}", error);
        }
        for warning in &validation.warnings {
            warn!("   ⚠️  {}", warning);
        }
        info!("");
    }
}

/// Display startup banner with version information
pub fn display_startup_banner(version: &str) {
    info!("");
    info!("╔══════════════════════════════════════════════════════════════╗");
    info!("║                      MCP Gateway v{:<10}                 ║", version);
    info!("║         Pooled, load-balanced MCP server gateway             ║");
    info!("╚══════════════════════════════════════════════════════════════╝");
    info!("");
}
