//! Sliding-window rate limiter for a single connection

use crate::config::RateLimitConfig;
use crate::utils::{saturating_add, saturating_sub};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SlidingWindowRateLimiter {
    config: RateLimitConfig,
    /// Admitted request times, oldest first
    requests: VecDeque<DateTime<Utc>>,
    last_reset: DateTime<Utc>,
}

impl SlidingWindowRateLimiter {
    pub fn new(config: RateLimitConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            requests: VecDeque::new(),
            last_reset: now,
        }
    }

    fn window(&self) -> Duration {
        Duration::from_millis(self.config.window)
    }

    /// Drop timestamps that fell out of the window
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = saturating_sub(now, self.window());
        let before = self.requests.len();
        while self.requests.front().map_or(false, |ts| *ts <= cutoff) {
            self.requests.pop_front();
        }
        if before > 0 && self.requests.is_empty() {
            self.last_reset = now;
        }
    }

    pub fn is_allowed(&mut self, now: DateTime<Utc>) -> bool {
        self.prune(now);
        (self.requests.len() as u32) < self.config.requests
    }

    /// Record an admitted request
    pub fn record(&mut self, now: DateTime<Utc>) {
        self.prune(now);
        self.requests.push_back(now);
    }

    /// How long until the oldest entry leaves the window
    pub fn retry_after(&self, now: DateTime<Utc>) -> Duration {
        match self.requests.front() {
            Some(oldest) if (self.requests.len() as u32) >= self.config.requests => {
                let free_at = saturating_add(*oldest, self.window());
                (free_at - now).to_std().unwrap_or(Duration::ZERO)
            }
            _ => Duration::ZERO,
        }
    }

    pub fn in_window(&self) -> usize {
        self.requests.len()
    }

    pub fn last_reset(&self) -> DateTime<Utc> {
        self.last_reset
    }
}
