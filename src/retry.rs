//! Retry policy for provider calls
//!
//! Transient failures (network, rate limit, timeout) are retried with exponential backoff.
//! Everything else is returned on the first occurrence.

use crate::error::{Result, SqlBuddyError};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

/// A value together with the number of attempts it took to obtain it
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Retry without sleeping between attempts
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Calculate delay for retry attempt (exponential backoff)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = (self.initial_delay.as_millis() as f64)
            * self.backoff_multiplier.powi(attempt as i32);
        let delay_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(delay_ms as u64)
    }

    /// Run `operation` under `timeout`, retrying transient failures.
    ///
    /// An attempt that exceeds `timeout` is abandoned (its future is dropped, so a late
    /// response is discarded) and counts as a `ProviderTimeout` against the budget.
    pub async fn run<F, Fut, T>(&self, timeout: Duration, mut operation: F) -> Result<Attempted<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let outcome = match tokio::time::timeout(timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(SqlBuddyError::ProviderTimeout(timeout)),
            };

            match outcome {
                Ok(value) => return Ok(Attempted { value, attempts }),
                Err(err) if err.is_transient() && attempts <= self.max_retries => {
                    let delay = self.delay_for_attempt(attempts - 1);
                    warn!(
                        attempt = attempts,
                        max_retries = self.max_retries,
                        ?delay,
                        "Transient provider failure, retrying: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(SqlBuddyError::Provider(message)) if attempts > 1 => {
                    return Err(SqlBuddyError::Provider(format!(
                        "{} (gave up after {} attempts)",
                        message, attempts
                    )));
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_delay_for_attempt_is_capped() {
        let policy = RetryPolicy::new(
            5,
            Duration::from_millis(100),
            Duration::from_millis(300),
            2.0,
        );
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(300));
        assert_eq!(policy.delay_for_attempt(6), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_retry_transient_then_success() {
        let policy = RetryPolicy::immediate(2);
        let calls = Arc::new(Mutex::new(0));
        let calls_clone = calls.clone();

        let result = policy
            .run(Duration::from_secs(1), move || {
                let calls = calls_clone.clone();
                async move {
                    let mut count = calls.lock().unwrap();
                    *count += 1;
                    if *count < 3 {
                        Err(SqlBuddyError::Provider("rate limited".to_string()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result.value, "done");
        assert_eq!(result.attempts, 3);
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_non_transient_error_is_not_retried() {
        let policy = RetryPolicy::immediate(2);
        let calls = Arc::new(Mutex::new(0));
        let calls_clone = calls.clone();

        let result: Result<Attempted<()>> = policy
            .run(Duration::from_secs(1), move || {
                let calls = calls_clone.clone();
                async move {
                    *calls.lock().unwrap() += 1;
                    Err(SqlBuddyError::ProviderRejected("invalid api key".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(SqlBuddyError::ProviderRejected(_))));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_budget_exhausted_surfaces_last_error() {
        let policy = RetryPolicy::immediate(2);
        let calls = Arc::new(Mutex::new(0));
        let calls_clone = calls.clone();

        let result: Result<Attempted<()>> = policy
            .run(Duration::from_secs(1), move || {
                let calls = calls_clone.clone();
                async move {
                    *calls.lock().unwrap() += 1;
                    Err(SqlBuddyError::Provider("connection reset".to_string()))
                }
            })
            .await;

        match result {
            Err(SqlBuddyError::Provider(message)) => {
                assert!(message.contains("connection reset"));
                assert!(message.contains("3 attempts"));
            }
            other => panic!("expected provider error, got {:?}", other),
        }
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_slow_attempt_times_out() {
        let policy = RetryPolicy::immediate(0);

        let result = policy
            .run(Duration::from_millis(20), || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(SqlBuddyError::ProviderTimeout(_))));
    }
}
