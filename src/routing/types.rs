//! Request, response and caller context types for the gateway

use crate::error::GatewayError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// Rate-limit state supplied by the caller's middleware
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRateLimit {
    pub limit: u32,
    pub remaining: u32,
    #[serde(default)]
    pub reset_at: Option<DateTime<Utc>>,
}

/// Caller context; trusted as populated by the authn layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpRequestContext {
    #[serde(default)]
    pub user_id: Option<String>,
    /// Method patterns the caller may invoke (`*`, `prefix.*`, exact)
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub rate_limit: Option<ContextRateLimit>,
}

impl McpRequestContext {
    /// Context carrying full permissions and no rate limit
    pub fn trusted() -> Self {
        Self {
            user_id: None,
            permissions: vec!["*".to_string()],
            rate_limit: None,
        }
    }
}

/// Per-call gateway options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecuteOptions {
    pub use_cache: bool,
    /// Per-attempt timeout (ms); defaults to `gateway.requestTimeout`
    pub timeout: Option<u64>,
    /// Overrides `gateway.retry.maxAttempts`
    pub max_attempts: Option<u32>,
    /// Minimum connection priority to prefer
    pub priority: Option<i32>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            timeout: None,
            max_attempts: None,
            priority: None,
        }
    }
}

impl ExecuteOptions {
    pub fn no_cache() -> Self {
        Self {
            use_cache: false,
            ..Default::default()
        }
    }
}

/// A logical request as seen by the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: String,
    pub method: String,
    pub params: Value,
    pub timeout: Duration,
    pub retries: u32,
    pub priority: Option<i32>,
    pub cacheable: bool,
    pub received_at: DateTime<Utc>,
}

impl Request {
    pub fn new(method: &str, params: Value, timeout: Duration, retries: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            method: method.to_string(),
            params,
            timeout,
            retries,
            priority: None,
            cacheable: false,
            received_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: String,
    pub message: String,
}

impl From<&GatewayError> for ResponseError {
    fn from(error: &GatewayError) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub server_name: Option<String>,
    /// Milliseconds spent in the gateway
    pub response_time: u64,
    pub from_cache: bool,
    pub retry_count: u32,
    /// Connection that served the request, or `cache`
    pub provider: Option<String>,
}

/// Uniform gateway response; failures never escape as errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
    pub metadata: ResponseMetadata,
}

impl Response {
    pub fn ok(id: String, data: Value, metadata: ResponseMetadata) -> Self {
        Self {
            id,
            success: true,
            data: Some(data),
            error: None,
            metadata,
        }
    }

    pub fn failed(id: String, error: &GatewayError, metadata: ResponseMetadata) -> Self {
        Self {
            id,
            success: false,
            data: None,
            error: Some(error.into()),
            metadata,
        }
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}
