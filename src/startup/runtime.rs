//! Wiring of the gateway components

use crate::config::Config;
use crate::error::Result;
use crate::events::EventBus;
use crate::mcp::{ProcessTransportFactory, TransportFactory};
use crate::monitoring::MonitoringService;
use crate::pool::ConnectionManager;
use crate::registry::{ServerRegistry, StaticServerRegistry};
use crate::routing::ServerGateway;
use crate::utils::{system_clock, SharedClock};
use std::sync::Arc;
use tracing::info;

/// All components of a running gateway, sharing one event bus and clock
pub struct GatewayRuntime {
    pub config: Config,
    pub events: EventBus,
    pub registry: Arc<StaticServerRegistry>,
    pub connections: Arc<ConnectionManager>,
    pub gateway: Arc<ServerGateway>,
    pub monitoring: Option<Arc<MonitoringService>>,
}

impl GatewayRuntime {
    pub fn build(config: Config, factory: Arc<dyn TransportFactory>, clock: SharedClock) -> Self {
        let events = EventBus::new();
        let registry = Arc::new(StaticServerRegistry::from_config(&config));
        let shared_registry: Arc<dyn ServerRegistry> = registry.clone();

        let connections = Arc::new(ConnectionManager::new(
            config.mcp_servers.clone(),
            config.connection_pool.clone(),
            factory,
            clock.clone(),
            events.clone(),
        ));
        let gateway = Arc::new(ServerGateway::new(
            &config,
            shared_registry.clone(),
            connections.clone(),
            events.clone(),
            clock.clone(),
        ));
        let monitoring = config.monitoring.enabled.then(|| {
            Arc::new(MonitoringService::new(config.monitoring.clone(), clock).with_registry(shared_registry))
        });

        Self {
            config,
            events,
            registry,
            connections,
            gateway,
            monitoring,
        }
    }

    /// Runtime spawning real server processes on the wall clock
    pub fn from_config(config: Config) -> Self {
        Self::build(config, Arc::new(ProcessTransportFactory), system_clock())
    }

    /// Start monitoring first so it sees connection creation, then the pools
    /// and the gateway loops.
    pub async fn start(&self) -> Result<()> {
        if let Some(ref monitoring) = self.monitoring {
            monitoring.init().await?;
            monitoring.attach(&self.events);
            monitoring.start();
        }
        self.connections.initialize().await?;
        self.gateway.start().await;
        info!(
            "✅ MCP Gateway ready ({} servers)",
            self.connections.server_names().len()
        );
        Ok(())
    }

    /// Ordered shutdown: gateway (and with it the pools), then monitoring
    pub async fn shutdown(&self) -> Result<()> {
        let result = self.gateway.shutdown().await;
        if let Some(ref monitoring) = self.monitoring {
            monitoring.shutdown();
        }
        result
    }
}
