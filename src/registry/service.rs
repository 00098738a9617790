//! Server registry
//!
//! Catalog of configured backend servers, their capabilities and categories,
//! and their last known health.

use crate::config::Config;
use crate::registry::types::{HealthStatus, RegisteredServer};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;
use tracing::info;

/// Fixed method prefix → category table used when no capability matches
const PREFIX_CATEGORIES: &[(&str, &str)] = &[
    ("file", "filesystem"),
    ("fs", "filesystem"),
    ("directory", "filesystem"),
    ("db", "database"),
    ("database", "database"),
    ("sql", "database"),
    ("query", "database"),
    ("web", "web"),
    ("http", "web"),
    ("fetch", "web"),
    ("browser", "web"),
    ("search", "search"),
    ("git", "development"),
    ("github", "development"),
    ("code", "development"),
    ("memory", "memory"),
    ("knowledge", "memory"),
    ("slack", "communication"),
    ("email", "communication"),
    ("ai", "ai"),
    ("llm", "ai"),
];

/// Path segments of a method name (`fs_read`, `tools/list`, `db.query`)
pub fn method_segments(method: &str) -> impl Iterator<Item = &str> {
    method.split(|c| matches!(c, '.' | '/' | '_' | '-' | ':'))
}

/// First path segment of a method, lowercased
pub fn method_prefix(method: &str) -> String {
    method_segments(method).next().unwrap_or(method).to_lowercase()
}

/// Category inferred from the method's first path segment
pub fn infer_category(method: &str) -> Option<&'static str> {
    let segment = method_prefix(method);
    PREFIX_CATEGORIES
        .iter()
        .find(|(prefix, _)| *prefix == segment)
        .map(|(_, category)| *category)
}

/// Lookup operations the gateway consumes
#[async_trait]
pub trait ServerRegistry: Send + Sync {
    async fn find_servers_by_capability(&self, method: &str) -> Vec<RegisteredServer>;
    async fn find_servers_by_category(&self, category: &str) -> Vec<RegisteredServer>;
    async fn get_health_status(&self, name: &str) -> Option<HealthStatus>;
    async fn get_all_servers(&self) -> Vec<RegisteredServer>;
    async fn get_available_capabilities(&self) -> Vec<String>;
    async fn get_available_categories(&self) -> Vec<String>;
    async fn update_health_status(&self, name: &str, status: HealthStatus);
}

/// Registry built once from configuration
#[derive(Debug, Default)]
pub struct StaticServerRegistry {
    servers: RwLock<BTreeMap<String, RegisteredServer>>,
}

impl StaticServerRegistry {
    pub fn from_config(config: &Config) -> Self {
        let servers = config
            .mcp_servers
            .iter()
            .map(|(name, server)| {
                let entry = RegisteredServer {
                    name: name.clone(),
                    capabilities: server.capabilities.clone(),
                    category: server.config.category.clone(),
                    priority: server.config.priority,
                    critical: server.config.critical,
                    health: HealthStatus::Healthy,
                };
                (name.clone(), entry)
            })
            .collect();
        Self {
            servers: RwLock::new(servers),
        }
    }

    pub fn from_servers<I: IntoIterator<Item = RegisteredServer>>(servers: I) -> Self {
        Self {
            servers: RwLock::new(servers.into_iter().map(|s| (s.name.clone(), s)).collect()),
        }
    }
}

#[async_trait]
impl ServerRegistry for StaticServerRegistry {
    async fn find_servers_by_capability(&self, method: &str) -> Vec<RegisteredServer> {
        self.servers
            .read()
            .await
            .values()
            .filter(|s| s.has_capability(method))
            .cloned()
            .collect()
    }

    async fn find_servers_by_category(&self, category: &str) -> Vec<RegisteredServer> {
        self.servers
            .read()
            .await
            .values()
            .filter(|s| s.category.as_deref().map_or(false, |c| c.eq_ignore_ascii_case(category)))
            .cloned()
            .collect()
    }

    async fn get_health_status(&self, name: &str) -> Option<HealthStatus> {
        self.servers.read().await.get(name).map(|s| s.health)
    }

    async fn get_all_servers(&self) -> Vec<RegisteredServer> {
        self.servers.read().await.values().cloned().collect()
    }

    async fn get_available_capabilities(&self) -> Vec<String> {
        let servers = self.servers.read().await;
        let set: BTreeSet<String> = servers.values().flat_map(|s| s.capabilities.iter().cloned()).collect();
        set.into_iter().collect()
    }

    async fn get_available_categories(&self) -> Vec<String> {
        let servers = self.servers.read().await;
        let set: BTreeSet<String> = servers.values().filter_map(|s| s.category.clone()).collect();
        set.into_iter().collect()
    }

    async fn update_health_status(&self, name: &str, status: HealthStatus) {
        if let Some(server) = self.servers.write().await.get_mut(name) {
            if server.health != status {
                info!("Server '{}' health changed: {} -> {}", name, server.health, status);
                server.health = status;
            }
        }
    }
}
