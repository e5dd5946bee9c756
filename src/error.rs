use std::time::Duration;
use thiserror::Error;

/// Error taxonomy shared by provider adapters, the cache layer and the facade
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (permanent failures)
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    // Network errors (transient - should retry)
    #[error("Provider {provider} transport failure: {message}")]
    ProviderTransport { provider: String, message: String },

    #[error("Provider {provider} returned HTTP {status}: {message}")]
    ProviderStatus {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Provider {provider} response could not be parsed: {message}")]
    ProviderParse { provider: String, message: String },

    #[error("Token acquisition failed for {provider}: {reason}")]
    TokenAcquisition { provider: String, reason: String },

    #[error("Provider {provider} has no direct detail endpoint")]
    DetailNotSupported { provider: String },

    #[error("Rate limit exceeded: retry after {retry_after:?}")]
    RateLimitExceeded { retry_after: Duration },

    // Client errors (permanent - don't retry)
    #[error("Invalid query: {field} - {reason}")]
    InvalidQuery { field: String, reason: String },

    #[error("Timeout error: operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Worker pool closed")]
    PoolClosed,
}

/// Error categorization for retry strategies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Permanent errors - should not retry
    Permanent,
    /// Transient errors - safe to retry
    Transient,
    /// Rate limited - retry with backoff
    RateLimited,
}

impl Error {
    /// Categorize error for retry logic
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_)
            | Self::InvalidConfig { .. }
            | Self::InvalidQuery { .. }
            | Self::ProviderParse { .. }
            | Self::TokenAcquisition { .. }
            | Self::DetailNotSupported { .. }
            | Self::PoolClosed => ErrorCategory::Permanent,

            Self::RateLimitExceeded { .. } => ErrorCategory::RateLimited,

            Self::ProviderStatus { status, .. } => match *status {
                429 => ErrorCategory::RateLimited,
                // 401 is handled by the token refresh path, not the retry loop
                400..=499 => ErrorCategory::Permanent,
                _ => ErrorCategory::Transient,
            },

            Self::ProviderTransport { .. } | Self::Timeout { .. } => ErrorCategory::Transient,
        }
    }

    /// Check if error is retryable
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::RateLimited
        )
    }

    /// Get suggested retry delay for rate limited errors
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Whether the provider rejected the bearer token
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::ProviderStatus { status: 401, .. })
    }

    /// Build a transport failure from a reqwest error, tagging timeouts separately
    pub fn transport(provider: &str, err: &reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("request timed out: {err}")
        } else if err.is_connect() {
            format!("connection failed: {err}")
        } else {
            format!("request failed: {err}")
        };
        Self::ProviderTransport {
            provider: provider.to_string(),
            message,
        }
    }

    pub fn parse(provider: &str, message: impl Into<String>) -> Self {
        Self::ProviderParse {
            provider: provider.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_categorization() {
        let status = |code| Error::ProviderStatus {
            provider: "epo".to_string(),
            status: code,
            message: String::new(),
        };

        assert_eq!(status(503).category(), ErrorCategory::Transient);
        assert_eq!(status(429).category(), ErrorCategory::RateLimited);
        assert_eq!(status(400).category(), ErrorCategory::Permanent);
        assert!(status(401).is_unauthorized());
        assert!(!status(500).is_unauthorized());
    }

    #[test]
    fn test_parse_and_token_errors_are_permanent() {
        assert!(!Error::parse("uspto", "bad json").is_retryable());
        assert!(!Error::TokenAcquisition {
            provider: "epo".to_string(),
            reason: "401".to_string(),
        }
        .is_retryable());
        assert!(Error::ProviderTransport {
            provider: "tm".to_string(),
            message: "reset".to_string(),
        }
        .is_retryable());
    }

    #[tokio::test]
    async fn test_reqwest_failures_become_tagged_transport_errors() {
        let err = reqwest::Client::new()
            .get("http://127.0.0.1:9/unreachable")
            .send()
            .await
            .unwrap_err();

        let mapped = Error::transport("trademark", &err);
        assert!(matches!(
            &mapped,
            Error::ProviderTransport { provider, .. } if provider == "trademark"
        ));
        assert_eq!(mapped.category(), ErrorCategory::Transient);
    }
}
