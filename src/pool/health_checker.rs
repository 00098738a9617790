//! Active health probing for pooled connections

use crate::error::GatewayError;
use crate::mcp::{McpRequest, McpTransport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::time::Instant;
use tokio::time::Duration;
use tracing::debug;

/// Outcome of one probe
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub response_time_ms: Option<u64>,
    pub error_details: Option<String>,
    /// The process itself is gone, not merely slow
    pub disconnected: bool,
    pub last_checked: DateTime<Utc>,
}

/// Sends lightweight `ping` probes over a transport
#[derive(Debug, Clone)]
pub struct ConnectionHealthChecker {
    timeout: Duration,
}

impl Default for ConnectionHealthChecker {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

impl ConnectionHealthChecker {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe a live transport.
    ///
    /// A JSON-RPC error answer still proves the backend is responsive, so only
    /// timeouts and transport failures count as unhealthy.
    pub async fn probe(&self, name: &str, transport: &dyn McpTransport, now: DateTime<Utc>) -> HealthCheckResult {
        let started = Instant::now();
        debug!("🏓 [HEALTH] Starting ping check for connection: {}", name);

        if !transport.is_alive().await {
            return HealthCheckResult {
                healthy: false,
                response_time_ms: None,
                error_details: Some("Process is not running".to_string()),
                disconnected: true,
                last_checked: now,
            };
        }

        let result = transport
            .send_request(McpRequest::new("ping", Some(json!({}))), self.timeout)
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(_) | Err(GatewayError::Backend { .. }) => {
                debug!("🏓 [HEALTH] Connection '{}' ping successful ({}ms)", name, elapsed_ms);
                HealthCheckResult {
                    healthy: true,
                    response_time_ms: Some(elapsed_ms),
                    error_details: None,
                    disconnected: false,
                    last_checked: now,
                }
            }
            Err(e) => {
                debug!("🏓 [HEALTH] Connection '{}' ping failed: {} ({}ms)", name, e, elapsed_ms);
                HealthCheckResult {
                    healthy: false,
                    response_time_ms: Some(elapsed_ms),
                    disconnected: matches!(e, GatewayError::ProcessCrashed { .. }),
                    error_details: Some(e.to_string()),
                    last_checked: now,
                }
            }
        }
    }
}
