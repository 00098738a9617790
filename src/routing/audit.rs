//! Request audit trail

use crate::routing::types::{McpRequestContext, Response};
use serde_json::{json, Value};
use tracing::{info, warn};

/// Writes one structured event per executed gateway request
#[derive(Debug, Clone)]
pub struct AuditLogger {
    enabled: bool,
    /// Emit JSON under the `audit` target instead of a human-readable line
    structured_logging: bool,
}

impl AuditLogger {
    pub fn new(enabled: bool, structured_logging: bool) -> Self {
        Self {
            enabled,
            structured_logging,
        }
    }

    pub fn request_event(method: &str, context: &McpRequestContext, response: &Response) -> Value {
        json!({
            "event": "gateway_request",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "request_id": response.id,
            "method": method,
            "user_id": context.user_id,
            "success": response.success,
            "server_name": response.metadata.server_name,
            "from_cache": response.metadata.from_cache,
            "retry_count": response.metadata.retry_count,
            "response_time_ms": response.metadata.response_time,
            "error_code": response.error_code(),
        })
    }

    pub fn log_request(&self, method: &str, context: &McpRequestContext, response: &Response) {
        if !self.enabled {
            return;
        }
        let event = Self::request_event(method, context, response);
        if self.structured_logging {
            info!(target: "audit", "Gateway Request: {}", event);
        } else if response.success {
            info!("[AUDIT] {} succeeded via {:?}", method, response.metadata.server_name);
        } else {
            warn!("[AUDIT] {} failed: {:?}", method, response.error_code());
        }
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new(true, true)
    }
}
