//! Bounded retries with exponential backoff and jitter
//!
//! Every API call goes through a [`CallGuard`]: each attempt is bounded by
//! the per-call timeout (expiry counts as a transient failure) and transient
//! failures are retried up to the configured attempt count.

use crate::config::{EngineConfig, RetryPolicy};
use crate::error::ApiError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff parameters
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any one delay
    pub max_delay: Duration,
    /// Growth factor per attempt
    pub exponential_base: f64,
    /// Randomize each delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryPolicy::default().into()
    }
}

impl From<RetryPolicy> for RetryConfig {
    fn from(policy: RetryPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts.max(1),
            base_delay: Duration::from_millis(policy.base_delay_ms),
            max_delay: Duration::from_millis(policy.max_delay_ms),
            exponential_base: 2.0,
            jitter: policy.jitter,
        }
    }
}

impl RetryConfig {
    /// Delay before retrying after attempt `attempt` (0-indexed)
    #[must_use]
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_secs = self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());

        let final_secs = if self.jitter {
            // factor in [0.5, 1.5) keeps the mean delay and never goes near zero
            let factor = rand::rng().random_range(0.5..1.5);
            (capped_secs * factor).min(self.max_delay.as_secs_f64())
        } else {
            capped_secs
        };

        Duration::from_secs_f64(final_secs)
    }
}

/// Outcome bookkeeping for one retried call
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    /// Attempts made
    pub attempts: u32,
    /// Time spent waiting between attempts
    pub total_delay: Duration,
    /// The last attempt succeeded
    pub success: bool,
}

/// Retry `operation` while `should_retry` accepts the error
pub async fn retry_async<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: impl Fn(&E) -> bool,
) -> (Result<T, E>, RetryStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut stats = RetryStats::default();
    let max_attempts = config.max_attempts.max(1);

    loop {
        let attempt = stats.attempts;
        stats.attempts += 1;

        match operation().await {
            Ok(value) => {
                stats.success = true;
                if attempt > 0 {
                    debug!("operation succeeded after {} attempts", stats.attempts);
                }
                return (Ok(value), stats);
            }
            Err(e) => {
                if !should_retry(&e) {
                    debug!("error is not retryable: {}", e);
                    return (Err(e), stats);
                }
                if stats.attempts >= max_attempts {
                    warn!("all {} attempts exhausted, last error: {}", max_attempts, e);
                    return (Err(e), stats);
                }

                let delay = config.calculate_delay(attempt);
                stats.total_delay += delay;
                warn!(
                    "attempt {}/{} failed: {}. retrying in {:?}",
                    stats.attempts, max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Timeout plus retry policy applied to every API call of a run
#[derive(Debug, Clone)]
pub struct CallGuard {
    retry: RetryConfig,
    timeout: Duration,
}

impl CallGuard {
    /// Create a guard
    #[must_use]
    pub fn new(retry: RetryConfig, timeout: Duration) -> Self {
        Self { retry, timeout }
    }

    /// Guard matching an engine configuration
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.retry.clone().into(), config.call_timeout())
    }

    /// Per-call timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one API call with timeout and retries
    pub async fn call<F, Fut, T>(&self, mut operation: F) -> (Result<T, ApiError>, RetryStats)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let timeout = self.timeout;
        retry_async(
            &self.retry,
            || {
                let attempt = operation();
                async move {
                    match tokio::time::timeout(timeout, attempt).await {
                        Ok(result) => result,
                        Err(_) => Err(ApiError::Timeout(timeout)),
                    }
                }
            },
            ApiError::is_retryable,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            exponential_base: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn delay_doubles_and_caps() {
        let config = RetryConfig {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            jitter: false,
            ..fast()
        };
        assert_eq!(config.calculate_delay(0), Duration::from_secs(1));
        assert_eq!(config.calculate_delay(1), Duration::from_secs(2));
        assert_eq!(config.calculate_delay(2), Duration::from_secs(4));
        assert_eq!(config.calculate_delay(3), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_in_band() {
        let config = RetryConfig {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter: true,
            ..fast()
        };
        for _ in 0..20 {
            let delay = config.calculate_delay(0);
            assert!(delay >= Duration::from_secs(1) && delay <= Duration::from_secs(3));
        }
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let guard = CallGuard::new(fast(), Duration::from_secs(1));
        let (result, stats) = guard
            .call(|| {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ApiError::RateLimited)
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(stats.attempts, 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let guard = CallGuard::new(fast(), Duration::from_secs(1));
        let (result, stats): (Result<(), _>, _) = guard
            .call(|| async { Err(ApiError::Permission("read-only token".into())) })
            .await;
        assert!(matches!(result, Err(ApiError::Permission(_))));
        assert_eq!(stats.attempts, 1);
    }

    #[tokio::test]
    async fn timeout_is_transient_and_exhausts() {
        let guard = CallGuard::new(fast(), Duration::from_millis(10));
        let (result, stats): (Result<(), _>, _) = guard
            .call(|| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert_eq!(result.unwrap_err(), ApiError::Timeout(Duration::from_millis(10)));
        assert_eq!(stats.attempts, 3);
        assert!(!stats.success);
    }
}
