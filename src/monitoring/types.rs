//! Monitoring data model

use crate::pool::CircuitState;
use crate::registry::HealthStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::system::SystemSnapshot;

/// Log severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// A monitoring log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    /// Captured for error-level entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Query over the in-memory log buffer
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    /// Minimum level
    pub level: Option<LogLevel>,
    pub server_name: Option<String>,
    pub since: Option<DateTime<Utc>>,
    /// Most recent N entries
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    ResponseTime,
    RequestCount,
    ErrorCount,
    HealthCheck,
    ProcessRestart,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::ResponseTime => "response_time",
            MetricType::RequestCount => "request_count",
            MetricType::ErrorCount => "error_count",
            MetricType::HealthCheck => "health_check",
            MetricType::ProcessRestart => "process_restart",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One metric sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub server_name: String,
    pub connection_id: Option<String>,
    pub metric_type: MetricType,
    pub value: f64,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// Derived health of one backend server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerHealth {
    pub server_name: String,
    pub status: HealthStatus,
    /// Seconds since the first metric seen for this server
    pub uptime: u64,
    /// Latest response time sample (ms)
    pub response_time: f64,
    pub error_rate: f64,
    pub availability_rate: f64,
    pub request_count: u64,
    pub error_count: u64,
    pub circuit_breaker_state: CircuitState,
    pub last_check: DateTime<Utc>,
}

impl ServerHealth {
    pub fn new(server_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            server_name: server_name.to_string(),
            status: HealthStatus::Healthy,
            uptime: 0,
            response_time: 0.0,
            error_rate: 0.0,
            availability_rate: 1.0,
            request_count: 0,
            error_count: 0,
            circuit_breaker_state: CircuitState::Closed,
            last_check: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub severity: Severity,
    pub server_name: String,
    pub message: String,
    pub value: Option<f64>,
    pub threshold: Option<f64>,
    #[serde(default)]
    pub metadata: Value,
    pub acknowledged: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn is_active(&self) -> bool {
        self.resolved_at.is_none()
    }

    /// Payload handed to notification channels
    pub fn payload(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "type": self.alert_type,
            "severity": self.severity,
            "serverName": self.server_name,
            "message": self.message,
            "value": self.value,
            "threshold": self.threshold,
            "timestamp": self.timestamp,
        })
    }
}

/// Query over stored alerts
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    /// Only alerts without `resolved_at`
    pub active_only: bool,
    pub unacknowledged_only: bool,
    pub server_name: Option<String>,
    pub min_severity: Option<Severity>,
}

impl AlertFilter {
    pub fn matches(&self, alert: &Alert) -> bool {
        if self.active_only && !alert.is_active() {
            return false;
        }
        if self.unacknowledged_only && alert.acknowledged {
            return false;
        }
        if let Some(ref server) = self.server_name {
            if &alert.server_name != server {
                return false;
            }
        }
        self.min_severity.map_or(true, |min| alert.severity >= min)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(format!("unknown export format '{}'", other)),
        }
    }
}

/// Dashboard headline numbers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardOverview {
    pub total_servers: usize,
    pub healthy_servers: usize,
    pub degraded_servers: usize,
    pub unhealthy_servers: usize,
    /// Requests over the health window
    pub recent_requests: u64,
    pub recent_errors: u64,
    pub average_response_time: f64,
    pub active_alerts: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub generated_at: DateTime<Utc>,
    pub overview: DashboardOverview,
    pub servers: Vec<ServerHealth>,
    /// Ten most recent alerts from the last 24 hours
    pub recent_alerts: Vec<Alert>,
    pub system: SystemSnapshot,
}
