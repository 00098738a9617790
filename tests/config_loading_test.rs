//! Configuration Loading Tests
//!
//! Verifies that gateway configuration files load from disk in both JSON and
//! YAML form, fall back to defaults, and are rejected when invalid.

use mcp_gateway::config::{Config, EvictionPolicy, LoadBalancingStrategy};
use std::fs;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).expect("Should be able to write config file");
    path
}

#[test]
fn test_load_json_file() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "mcp-gateway.json",
        r#"{
            "mcpServers": {
                "files": {
                    "command": "npx",
                    "args": ["-y", "@modelcontextprotocol/server-filesystem"],
                    "capabilities": ["file.*"]
                },
                "db": {
                    "command": "db-server",
                    "capabilities": ["db.query"],
                    "config": {"priority": 3, "critical": true}
                }
            },
            "gateway": {
                "cache": {"evictionPolicy": "fifo"},
                "requestTimeout": 5000
            },
            "monitoring": {"thresholds": {"errorRate": 0.2}}
        }"#,
    );

    let config = Config::load(&path).expect("JSON config should load");
    assert_eq!(config.mcp_servers.len(), 2);
    assert_eq!(config.mcp_servers["db"].config.priority, 3);
    assert!(config.mcp_servers["db"].config.critical);
    assert_eq!(config.mcp_servers["files"].config.timeout, 30_000);
    assert_eq!(config.gateway.cache.eviction_policy, EvictionPolicy::Fifo);
    assert_eq!(config.gateway.cache.ttl, 300_000);
    assert_eq!(config.gateway.request_timeout, 5_000);
    assert!((config.monitoring.thresholds.error_rate - 0.2).abs() < f64::EPSILON);
    assert!((config.monitoring.thresholds.availability_rate - 0.95).abs() < f64::EPSILON);
}

#[test]
fn test_load_yaml_file() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "gateway.yaml",
        r#"
mcpServers:
  web:
    command: web-server
    capabilities: ["web.fetch"]
    config:
      rateLimit:
        requests: 5
        window: 1000
gateway:
  loadBalancing:
    strategy: least-connections
connectionPool:
  maxConnections: 2
"#,
    );

    let config = Config::load(&path).expect("YAML config should load");
    assert_eq!(config.mcp_servers["web"].config.rate_limit.requests, 5);
    assert_eq!(
        config.gateway.load_balancing.strategy,
        LoadBalancingStrategy::LeastConnections
    );
    assert_eq!(config.connection_pool.max_connections, 2);
    assert_eq!(config.connection_pool.min_connections, 1);
}

#[test]
fn test_missing_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let config = Config::load(dir.path().join("absent.json")).expect("defaults should load");
    assert!(config.mcp_servers.is_empty());
    assert_eq!(config.connection_pool.max_connections, 5);
    assert_eq!(config.gateway.retry.max_attempts, 3);
    assert!(config.monitoring.enabled);
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "bad.json",
        r#"{
            "mcpServers": {"files": {"command": "", "capabilities": ["file.*"]}},
            "connectionPool": {"minConnections": 4, "maxConnections": 2}
        }"#,
    );

    let err = Config::load(&path).unwrap_err();
    assert_eq!(err.code(), "CONFIG_ERROR");
    let message = err.to_string();
    assert!(message.contains("command cannot be empty"));
    assert!(message.contains("minConnections"));
}

#[test]
fn test_malformed_json_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "broken.json", "{ \"mcpServers\": ");
    let err = Config::load(&path).unwrap_err();
    assert_eq!(err.code(), "CONFIG_ERROR");
}
