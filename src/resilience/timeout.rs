use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

/// Timeout configuration for outbound registry operations
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Deadline for one provider's share of a fan-out search
    pub provider_call: Duration,
    /// Deadline for a credential exchange
    pub token_exchange: Duration,
    /// Deadline for a by-id detail fetch
    pub detail_fetch: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            provider_call: Duration::from_secs(30),
            token_exchange: Duration::from_secs(10),
            detail_fetch: Duration::from_secs(30),
        }
    }
}

impl TimeoutConfig {
    /// Derive deadlines from the search section of the configuration
    #[must_use]
    pub fn from_provider_timeout(provider_call: Duration) -> Self {
        Self {
            provider_call,
            token_exchange: provider_call.min(Duration::from_secs(10)),
            detail_fetch: provider_call,
        }
    }
}

/// Extension trait to add timeout functionality to futures
pub trait TimeoutExt<T> {
    /// Add timeout to a future with custom duration
    async fn with_timeout_duration(self, duration: Duration) -> Result<T>;

    /// Add timeout and log how long the operation took
    async fn with_logged_timeout(self, duration: Duration, operation_name: &str) -> Result<T>;
}

impl<F, T> TimeoutExt<T> for F
where
    F: Future<Output = T>,
{
    async fn with_timeout_duration(self, duration: Duration) -> Result<T> {
        match timeout(duration, self).await {
            Ok(result) => Ok(result),
            Err(_) => Err(Error::Timeout { timeout: duration }),
        }
    }

    async fn with_logged_timeout(self, duration: Duration, operation_name: &str) -> Result<T> {
        let start_time = Instant::now();
        match timeout(duration, self).await {
            Ok(result) => {
                debug!(
                    "Operation '{}' finished in {:?}",
                    operation_name,
                    start_time.elapsed()
                );
                Ok(result)
            }
            Err(_) => {
                warn!("Operation '{}' timed out after {:?}", operation_name, duration);
                Err(Error::Timeout { timeout: duration })
            }
        }
    }
}
