//! Gateway-level retry with configurable backoff

use crate::config::{BackoffStrategy, GatewayRetryConfig};
use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Linear backoff step added per attempt (ms)
const LINEAR_STEP_MS: u64 = 1_000;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        GatewayRetryConfig::default().into()
    }
}

impl From<GatewayRetryConfig> for RetryPolicy {
    fn from(config: GatewayRetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: config.backoff,
            initial_delay_ms: config.initial_delay,
            max_delay_ms: config.max_delay,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` (0-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = match self.backoff {
            BackoffStrategy::Exponential => self
                .initial_delay_ms
                .saturating_mul(2u64.saturating_pow(attempt))
                .min(self.max_delay_ms),
            BackoffStrategy::Linear => self
                .initial_delay_ms
                .saturating_add(LINEAR_STEP_MS.saturating_mul(attempt as u64))
                .min(self.max_delay_ms),
            BackoffStrategy::Fixed => self.initial_delay_ms,
        };
        Duration::from_millis(delay_ms)
    }
}

/// Determines if an error should be retried by the gateway
pub fn should_retry_error(error: &GatewayError) -> bool {
    error.is_retryable()
}

/// Runs an operation under a [`RetryPolicy`]
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `operation` until it succeeds, fails permanently or runs out of attempts.
    ///
    /// The closure receives the 0-based attempt number. Returns the result and
    /// the number of retries performed.
    pub async fn execute_with_retry<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> (Result<T>, u32)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 0..max_attempts {
            match operation(attempt).await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(
                            operation = operation_name,
                            attempt = attempt + 1,
                            "Operation succeeded after retry"
                        );
                    }
                    return (Ok(result), attempt);
                }
                Err(error) => {
                    if !should_retry_error(&error) {
                        debug!(
                            operation = operation_name,
                            attempt = attempt + 1,
                            error = %error,
                            "Error is not retryable, failing immediately"
                        );
                        return (Err(error), attempt);
                    }

                    if attempt + 1 >= max_attempts {
                        error!(
                            operation = operation_name,
                            total_attempts = attempt + 1,
                            error = %error,
                            "All retry attempts exhausted, failing"
                        );
                        return (Err(error), attempt);
                    }

                    let delay = self.policy.calculate_delay(attempt);
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Operation failed, retrying after delay"
                    );
                    sleep(delay).await;
                }
            }
        }

        (Err(GatewayError::internal("retry loop exhausted")), max_attempts - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(backoff: BackoffStrategy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff,
            initial_delay_ms: 1000,
            max_delay_ms: 5000,
        }
    }

    #[test]
    fn test_delay_calculation() {
        let exp = policy(BackoffStrategy::Exponential);
        assert_eq!(exp.calculate_delay(0), Duration::from_millis(1000));
        assert_eq!(exp.calculate_delay(2), Duration::from_millis(4000));
        assert_eq!(exp.calculate_delay(5), Duration::from_millis(5000));

        let linear = policy(BackoffStrategy::Linear);
        assert_eq!(linear.calculate_delay(0), Duration::from_millis(1000));
        assert_eq!(linear.calculate_delay(3), Duration::from_millis(4000));
        assert_eq!(linear.calculate_delay(9), Duration::from_millis(5000));

        let fixed = policy(BackoffStrategy::Fixed);
        assert_eq!(fixed.calculate_delay(7), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_success_after_retry() {
        let executor = RetryExecutor::new(RetryPolicy {
            initial_delay_ms: 1,
            ..policy(BackoffStrategy::Fixed)
        });
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let (result, retries) = executor
            .execute_with_retry("test_operation", move |_| {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count == 0 {
                        Err(GatewayError::transport("broken pipe"))
                    } else {
                        Ok(count)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(retries, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_once() {
        let executor = RetryExecutor::new(policy(BackoffStrategy::Fixed));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let (result, retries): (Result<()>, u32) = executor
            .execute_with_retry("test_operation", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(GatewayError::NoCapableServer {
                        method: "unknown.method".into(),
                    })
                }
            })
            .await;

        assert_eq!(result.unwrap_err().code(), "NO_AVAILABLE_SERVER");
        assert_eq!(retries, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
