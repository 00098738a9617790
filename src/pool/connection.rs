//! Pooled connection to a backend server

use crate::config::ServerPolicy;
use crate::mcp::McpTransport;
use crate::pool::circuit_breaker::{CircuitBreaker, CircuitBreakerSnapshot};
use crate::pool::rate_limiter::SlidingWindowRateLimiter;
use crate::utils::millis_between;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Active,
    Error,
    Disconnected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Active => "active",
            ConnectionState::Error => "error",
            ConnectionState::Disconnected => "disconnected",
        };
        write!(f, "{}", name)
    }
}

/// Request accounting for one connection
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Running mean over all completed requests (ms)
    pub average_response_time: f64,
}

impl ConnectionMetrics {
    pub fn record(&mut self, success: bool, response_time_ms: u64) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }
        let n = self.total_requests as f64;
        self.average_response_time += (response_time_ms as f64 - self.average_response_time) / n;
    }
}

/// A pooled connection; owned by exactly one server pool
pub struct Connection {
    pub id: String,
    pub server_name: String,
    pub state: ConnectionState,
    pub transport: Arc<dyn McpTransport>,
    /// Inherited from the server policy
    pub priority: i32,
    pub metrics: ConnectionMetrics,
    pub circuit_breaker: CircuitBreaker,
    pub rate_limiter: SlidingWindowRateLimiter,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub restarts: u32,
}

impl Connection {
    pub fn new(
        id: String,
        server_name: &str,
        transport: Arc<dyn McpTransport>,
        policy: &ServerPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            server_name: server_name.to_string(),
            state: ConnectionState::Idle,
            transport,
            priority: policy.priority,
            metrics: ConnectionMetrics::default(),
            circuit_breaker: CircuitBreaker::new(policy.circuit_breaker),
            rate_limiter: SlidingWindowRateLimiter::new(policy.rate_limit, now),
            created_at: now,
            last_used: now,
            restarts: 0,
        }
    }

    pub fn uptime_ms(&self, now: DateTime<Utc>) -> u64 {
        millis_between(self.created_at, now)
    }

    pub fn idle_for_ms(&self, now: DateTime<Utc>) -> u64 {
        millis_between(self.last_used, now)
    }

    pub fn info(&self, now: DateTime<Utc>) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.clone(),
            server_name: self.server_name.clone(),
            state: self.state,
            priority: self.priority,
            pid: self.transport.pid(),
            metrics: self.metrics.clone(),
            circuit_breaker: self.circuit_breaker.snapshot(),
            requests_in_window: self.rate_limiter.in_window(),
            uptime_ms: self.uptime_ms(now),
            last_used: self.last_used,
            restarts: self.restarts,
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("server_name", &self.server_name)
            .field("state", &self.state)
            .field("circuit", &self.circuit_breaker.state())
            .finish()
    }
}

/// Serializable view of a connection
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: String,
    pub server_name: String,
    pub state: ConnectionState,
    pub priority: i32,
    pub pid: Option<u32>,
    pub metrics: ConnectionMetrics,
    pub circuit_breaker: CircuitBreakerSnapshot,
    pub requests_in_window: usize,
    pub uptime_ms: u64,
    pub last_used: DateTime<Utc>,
    pub restarts: u32,
}
