use crate::error::ErrorCategory;
use crate::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first call included
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Maximum jitter as percentage of delay
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    /// A single attempt, no retries
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Config for rate limited retries: fewer attempts, longer waits
    #[must_use]
    pub fn rate_limited(base: &Self) -> Self {
        Self {
            max_attempts: base.max_attempts.min(2),
            initial_delay: base.initial_delay.max(Duration::from_secs(1)),
            max_delay: base.max_delay.max(Duration::from_secs(10)),
            multiplier: 1.5,
            jitter: 0.3,
        }
    }
}

/// Retry policy that determines retry behavior based on error
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    transient_config: RetryConfig,
    rate_limited_config: RetryConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(RetryConfig::default())
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: RetryConfig) -> Self {
        Self {
            rate_limited_config: RetryConfig::rate_limited(&config),
            transient_config: config,
        }
    }

    /// Get retry config based on error
    #[must_use]
    pub const fn config_for_error(&self, error: &Error) -> Option<&RetryConfig> {
        match error.category() {
            ErrorCategory::Permanent => None,
            ErrorCategory::RateLimited => Some(&self.rate_limited_config),
            ErrorCategory::Transient => Some(&self.transient_config),
        }
    }
}

/// Execute an operation with retry logic
pub async fn retry_with_policy<T, F, Fut>(
    operation: F,
    policy: &RetryPolicy,
    operation_name: &str,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;

    loop {
        debug!(
            "Executing operation '{}' (attempt {})",
            operation_name, attempt
        );

        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        "Operation '{}' succeeded after {} attempts",
                        operation_name, attempt
                    );
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        let Some(retry_config) = policy.config_for_error(&error) else {
            debug!(
                "Operation '{}' failed with non-retryable error: {}",
                operation_name, error
            );
            return Err(error);
        };

        if attempt >= retry_config.max_attempts {
            warn!(
                "Operation '{}' failed after {} attempts: {}",
                operation_name, attempt, error
            );
            return Err(error);
        }

        let delay = calculate_delay(attempt - 1, retry_config, &error);
        debug!(
            "Operation '{}' failed (attempt {}), retrying after {:?}: {}",
            operation_name, attempt, delay, error
        );

        sleep(delay).await;
        attempt += 1;
    }
}

/// Calculate delay for retry attempt
fn calculate_delay(attempt: u32, config: &RetryConfig, error: &Error) -> Duration {
    if let Some(retry_after) = error.retry_after() {
        return retry_after.min(config.max_delay);
    }

    let base_delay_ms = config.initial_delay.as_millis() as f64;
    let exponential_delay_ms = base_delay_ms * config.multiplier.powi(attempt as i32);
    let capped_delay_ms = exponential_delay_ms.min(config.max_delay.as_millis() as f64);
    let delay = Duration::from_millis(capped_delay_ms as u64);

    add_jitter(delay, config.jitter)
}

/// Add jitter to delay
fn add_jitter(delay: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return delay;
    }

    let jitter_ms = (delay.as_millis() as f64 * jitter_factor) as u64;
    let jitter = rand::thread_rng().gen_range(0..=jitter_ms);

    delay + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::from_config(RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: 0.0,
        })
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_policy(
            move || {
                let count = counter_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count < 2 {
                        Err(Error::ProviderTransport {
                            provider: "test".to_string(),
                            message: "connection reset".to_string(),
                        })
                    } else {
                        Ok(42u32)
                    }
                }
            },
            &quick_policy(3),
            "test_operation",
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_parse_error_is_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_policy(
            move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                async move { Err::<u32, Error>(Error::parse("test", "unexpected element")) }
            },
            &quick_policy(5),
            "test_operation",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_stops_at_max_attempts() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_policy(
            move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    Err::<u32, Error>(Error::ProviderStatus {
                        provider: "test".to_string(),
                        status: 503,
                        message: "down".to_string(),
                    })
                }
            },
            &quick_policy(2),
            "test_operation",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_jitter_bounds() {
        let delay = Duration::from_millis(1000);
        let jittered = add_jitter(delay, 0.1);

        assert!(jittered >= delay);
        assert!(jittered <= delay + Duration::from_millis(100));
    }

    #[test]
    fn test_rate_limited_config_selected() {
        let policy = RetryPolicy::default();
        let error = Error::RateLimitExceeded {
            retry_after: Duration::from_secs(3),
        };
        let config = policy.config_for_error(&error).unwrap();
        assert!(config.max_delay >= Duration::from_secs(10));
        assert_eq!(calculate_delay(0, config, &error), Duration::from_secs(3));
    }
}
