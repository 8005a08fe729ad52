//! Exponential backoff for adapter calls.
//!
//! Delays double from `base` up to `cap`; a rate-limited failure waits at
//! least the server's `retry_after`. Every call runs under the adapter
//! timeout, and an elapsed timeout counts as a transport failure.

use relist_core::{AdapterError, EngineConfig, FailureClass};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Default first backoff delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Default maximum backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Default number of attempts, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

// =============================================================================
// Policy
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_DELAY,
            cap: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            base: Duration::from_secs(config.retry_base_secs),
            cap: Duration::from_secs(config.retry_cap_secs),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Backoff after the `attempt`-th failure (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base.saturating_mul(1 << exponent).min(self.cap)
    }

    /// Backoff after a failure, honouring rate-limit hints.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, error: &AdapterError) -> Duration {
        let backoff = self.backoff(attempt);
        match error.classify() {
            FailureClass::RetryableSlow { retry_after_secs } => {
                backoff.max(Duration::from_secs(retry_after_secs))
            }
            _ => backoff,
        }
    }
}

// =============================================================================
// Execution
// =============================================================================

/// Why a retried call gave up.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryFailure {
    /// Non-retryable error on some attempt.
    Terminal { error: AdapterError, attempts: u32 },
    /// Every attempt failed with a retryable error.
    Exhausted { error: AdapterError, attempts: u32 },
}

impl RetryFailure {
    #[must_use]
    pub fn error(&self) -> &AdapterError {
        match self {
            Self::Terminal { error, .. } | Self::Exhausted { error, .. } => error,
        }
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Terminal { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Runs one adapter call under `timeout`.
///
/// # Errors
///
/// Returns the adapter's error, or [`AdapterError::Timeout`] if it elapsed.
pub async fn with_timeout<T, Fut>(timeout: Duration, call: Fut) -> Result<T, AdapterError>
where
    Fut: Future<Output = Result<T, AdapterError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Timeout(timeout.as_secs())),
    }
}

/// Retries `call` under `policy`, returning the value and the number of
/// attempts it took.
///
/// # Errors
///
/// Returns [`RetryFailure`] on a terminal error or once attempts run out.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    operation: &str,
    mut call: F,
) -> Result<(T, u32), RetryFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AdapterError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match with_timeout(timeout, call()).await {
            Ok(value) => return Ok((value, attempt)),
            Err(error) if !error.is_retryable() => {
                return Err(RetryFailure::Terminal {
                    error,
                    attempts: attempt,
                })
            }
            Err(error) if attempt >= policy.max_attempts => {
                return Err(RetryFailure::Exhausted {
                    error,
                    attempts: attempt,
                })
            }
            Err(error) => {
                let delay = policy.delay_for(attempt, &error);
                warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "adapter call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    // ==== Policy Tests ====

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(5), Duration::from_secs(32));
        assert_eq!(policy.backoff(6), Duration::from_secs(60));
        assert_eq!(policy.backoff(40), Duration::from_secs(60));
    }

    #[test]
    fn test_rate_limit_waits_at_least_retry_after() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for(1, &AdapterError::rate_limited(30)),
            Duration::from_secs(30)
        );
        assert_eq!(
            policy.delay_for(4, &AdapterError::rate_limited(1)),
            Duration::from_secs(16)
        );
    }

    #[test]
    fn test_from_config() {
        let config = EngineConfig {
            retry_base_secs: 1,
            retry_cap_secs: 10,
            max_attempts: 3,
            ..EngineConfig::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.base, Duration::from_secs(1));
        assert_eq!(policy.cap, Duration::from_secs(10));
        assert_eq!(policy.max_attempts, 3);
    }

    // ==== Execution Tests ====

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = retry(&RetryPolicy::default(), Duration::from_secs(10), "test", || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AdapterError::transport("reset"))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result, Ok(("done", 3)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_at_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<((), u32), _> =
            retry(&RetryPolicy::default(), Duration::from_secs(10), "test", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(AdapterError::transport("down")) }
            })
            .await;

        assert!(matches!(
            result,
            Err(RetryFailure::Exhausted { attempts: 5, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<((), u32), _> =
            retry(&RetryPolicy::default(), Duration::from_secs(10), "test", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(AdapterError::OutOfStock) }
            })
            .await;

        assert_eq!(
            result,
            Err(RetryFailure::Terminal {
                error: AdapterError::OutOfStock,
                attempts: 1
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_transport_failure() {
        let result: Result<(), AdapterError> = with_timeout(Duration::from_secs(10), async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await;

        assert_eq!(result, Err(AdapterError::Timeout(10)));
        assert!(result.unwrap_err().is_retryable());
    }
}
