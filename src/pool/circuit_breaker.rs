//! Per-connection circuit breaker.
//!
//! State machine: Closed → Open → HalfOpen → Closed, with HalfOpen → Open on a
//! failed trial. Every transition takes `now` explicitly so the breaker can be
//! driven deterministically from a test clock.

use crate::config::CircuitBreakerConfig;
use crate::utils::saturating_add;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// A state change produced by one of the transition functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitTransition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Snapshot for stats and health reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub next_attempt_time: Option<DateTime<Utc>>,
    pub trips_count: u64,
}

/// Circuit breaker for one pooled connection.
///
/// Requires `&mut self`; the pool serializes access under its lock.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    /// Unbroken streak of failed attempts
    failure_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
    /// Earliest time a HalfOpen trial is allowed while Open
    next_attempt_time: Option<DateTime<Utc>>,
    total_successes: u64,
    total_failures: u64,
    trips_count: u64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            next_attempt_time: None,
            total_successes: 0,
            total_failures: 0,
            trips_count: 0,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        CircuitBreakerSnapshot {
            state: self.state,
            failure_count: self.failure_count,
            last_failure_time: self.last_failure_time,
            next_attempt_time: self.next_attempt_time,
            trips_count: self.trips_count,
        }
    }

    fn next_attempt_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        saturating_add(now, Duration::from_millis(self.config.reset_timeout))
    }

    fn transition_to(&mut self, to: CircuitState) -> Option<CircuitTransition> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        Some(CircuitTransition { from, to })
    }

    /// Move Open → HalfOpen once the cooldown has elapsed.
    ///
    /// Called before every availability check so that Open never outlives
    /// `next_attempt_time`.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<CircuitTransition> {
        match (self.state, self.next_attempt_time) {
            (CircuitState::Open, Some(next)) if now >= next => {
                tracing::info!("circuit breaker cooldown elapsed, transitioning to HalfOpen");
                self.transition_to(CircuitState::HalfOpen)
            }
            _ => None,
        }
    }

    /// Whether requests are currently rejected
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        match (self.state, self.next_attempt_time) {
            (CircuitState::Open, Some(next)) => now < next,
            (CircuitState::Open, None) => true,
            _ => false,
        }
    }

    /// Time left until a trial is allowed
    pub fn retry_after(&self, now: DateTime<Utc>) -> Duration {
        match (self.state, self.next_attempt_time) {
            (CircuitState::Open, Some(next)) if next > now => {
                (next - now).to_std().unwrap_or(Duration::ZERO)
            }
            _ => Duration::ZERO,
        }
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) -> Option<CircuitTransition> {
        self.total_successes += 1;
        // A success after the cooldown counts as the trial
        let mut transition = self.poll(now);

        match self.state {
            CircuitState::Closed => {
                self.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                tracing::info!("circuit breaker trial succeeded, transitioning to Closed");
                self.failure_count = 0;
                self.next_attempt_time = None;
                let closed = self.transition_to(CircuitState::Closed);
                transition = match (transition, closed) {
                    (Some(first), Some(second)) => Some(CircuitTransition {
                        from: first.from,
                        to: second.to,
                    }),
                    (first, second) => second.or(first),
                };
            }
            CircuitState::Open => {
                tracing::warn!("success recorded while circuit is Open");
            }
        }
        transition
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) -> Option<CircuitTransition> {
        self.total_failures += 1;
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_time = Some(now);
        let polled = self.poll(now);

        let opened = match self.state {
            CircuitState::Closed if self.failure_count >= self.config.failure_threshold => {
                self.trips_count += 1;
                tracing::warn!(
                    failures = self.failure_count,
                    threshold = self.config.failure_threshold,
                    "circuit breaker tripped, transitioning to Open"
                );
                self.next_attempt_time = Some(self.next_attempt_after(now));
                self.transition_to(CircuitState::Open)
            }
            CircuitState::HalfOpen => {
                self.trips_count += 1;
                tracing::warn!("trial failed in HalfOpen, transitioning back to Open");
                self.next_attempt_time = Some(self.next_attempt_after(now));
                self.transition_to(CircuitState::Open)
            }
            _ => None,
        };

        match (polled, opened) {
            (Some(first), Some(second)) if first.from == second.to => None,
            (Some(first), Some(second)) => Some(CircuitTransition {
                from: first.from,
                to: second.to,
            }),
            (first, second) => second.or(first),
        }
    }
}
