//! Per-provider access tokens with single-flight refresh.
//!
//! Tokens live in the shared token tier keyed by provider name, each with a
//! lifetime of its issued expiry minus a safety margin, so an entry that is
//! still readable is always safe to present. At most one credential
//! exchange runs per provider at a time; callers that arrive mid-refresh
//! wait for it and reuse its result.

use crate::repositories::BoundedCache;
use crate::resilience::TimeoutExt;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A bearer token and the moment the issuer says it stops working
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl ProviderToken {
    /// Token valid for `expires_in` from now
    #[must_use]
    pub fn new(value: impl Into<String>, expires_in: Duration) -> Self {
        let expires_in = chrono::Duration::from_std(expires_in).unwrap_or(chrono::Duration::zero());
        Self {
            value: value.into(),
            expires_at: Utc::now() + expires_in,
        }
    }

    /// Time left before the issuer's expiry
    #[must_use]
    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Diagnostic view of a provider's credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    NoToken,
    Valid,
    /// Cached, but inside the refresh threshold
    ExpiringSoon,
}

/// Exchanges static credentials for a short-lived token
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    async fn exchange(&self) -> Result<ProviderToken>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(deserialize_with = "lenient_seconds")]
    expires_in: u64,
}

// OPS reports expires_in as a string; other issuers use a number
fn lenient_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(u64),
        Text(String),
    }

    match Seconds::deserialize(deserializer)? {
        Seconds::Number(n) => Ok(n),
        Seconds::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// OAuth2 client-credentials grant with HTTP basic authentication
pub struct OAuthClientCredentials {
    provider: String,
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl OAuthClientCredentials {
    pub fn new(
        provider: impl Into<String>,
        client: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    fn failure(&self, reason: impl Into<String>) -> Error {
        Error::TokenAcquisition {
            provider: self.provider.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl CredentialExchange for OAuthClientCredentials {
    async fn exchange(&self) -> Result<ProviderToken> {
        debug!("Requesting access token for {}", self.provider);

        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| self.failure(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.failure(format!("token endpoint returned HTTP {status}: {body}")));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| self.failure(format!("malformed token response: {e}")))?;

        if body.access_token.trim().is_empty() {
            return Err(self.failure("token endpoint returned an empty access_token"));
        }

        Ok(ProviderToken::new(
            body.access_token,
            Duration::from_secs(body.expires_in),
        ))
    }
}

/// Owns one provider's credential and hands out currently valid tokens
pub struct TokenManager {
    provider: String,
    exchange: Arc<dyn CredentialExchange>,
    tokens: Arc<BoundedCache<String, ProviderToken>>,
    refresh_lock: Mutex<()>,
    safety_margin: Duration,
    exchange_timeout: Duration,
}

impl TokenManager {
    pub fn new(
        provider: impl Into<String>,
        exchange: Arc<dyn CredentialExchange>,
        tokens: Arc<BoundedCache<String, ProviderToken>>,
        safety_margin: Duration,
    ) -> Self {
        Self {
            provider: provider.into(),
            exchange,
            tokens,
            refresh_lock: Mutex::new(()),
            safety_margin,
            exchange_timeout: Duration::from_secs(10),
        }
    }

    /// Bound a single credential exchange
    #[must_use]
    pub const fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// A token valid for at least the safety margin, refreshing if needed
    pub async fn get_token(&self) -> Result<String> {
        if let Some(token) = self.tokens.get(&self.provider).await {
            return Ok(token.value);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock
        if let Some(token) = self.tokens.get(&self.provider).await {
            debug!("Reusing token refreshed concurrently for {}", self.provider);
            return Ok(token.value);
        }

        let outcome = self
            .exchange
            .exchange()
            .with_timeout_duration(self.exchange_timeout)
            .await
            .map_err(|e| self.timeout_as_acquisition(e))?;
        let token = match outcome {
            Ok(token) => token,
            Err(e) => {
                warn!("Token exchange failed for {}: {}", self.provider, e);
                return Err(e);
            }
        };

        let usable_for = token.remaining().saturating_sub(self.safety_margin);
        if usable_for.is_zero() {
            return Err(Error::TokenAcquisition {
                provider: self.provider.clone(),
                reason: format!(
                    "issued token expires within the {:?} safety margin",
                    self.safety_margin
                ),
            });
        }

        info!(
            "Acquired access token for {} (usable for {:?})",
            self.provider, usable_for
        );
        self.tokens
            .put_with_ttl(self.provider.clone(), token.clone(), usable_for)
            .await;
        Ok(token.value)
    }

    /// Drop the cached token so the next call exchanges a fresh one
    pub async fn invalidate(&self) {
        if self.tokens.remove(&self.provider).await.is_some() {
            debug!("Invalidated cached token for {}", self.provider);
        }
    }

    /// Report whether a usable token is cached and how close it is to expiry
    pub async fn state(&self) -> TokenState {
        match self.tokens.get(&self.provider).await {
            None => TokenState::NoToken,
            Some(token) if token.remaining() <= self.safety_margin * 2 => TokenState::ExpiringSoon,
            Some(_) => TokenState::Valid,
        }
    }

    fn timeout_as_acquisition(&self, error: Error) -> Error {
        Error::TokenAcquisition {
            provider: self.provider.clone(),
            reason: error.to_string(),
        }
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("provider", &self.provider)
            .field("safety_margin", &self.safety_margin)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingExchange {
        calls: AtomicU32,
        lifetime: Duration,
        failing_calls: u32,
    }

    impl CountingExchange {
        fn new(lifetime: Duration) -> Self {
            Self {
                calls: AtomicU32::new(0),
                lifetime,
                failing_calls: 0,
            }
        }
    }

    #[async_trait]
    impl CredentialExchange for CountingExchange {
        async fn exchange(&self) -> Result<ProviderToken> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(20)).await;
            if n <= self.failing_calls {
                return Err(Error::TokenAcquisition {
                    provider: "epo".to_string(),
                    reason: "invalid client".to_string(),
                });
            }
            Ok(ProviderToken::new(format!("token-{n}"), self.lifetime))
        }
    }

    fn token_tier() -> Arc<BoundedCache<String, ProviderToken>> {
        Arc::new(BoundedCache::new("tokens", 4, Duration::from_secs(3600)).unwrap())
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_exchange() {
        let exchange = Arc::new(CountingExchange::new(Duration::from_secs(1200)));
        let manager = Arc::new(TokenManager::new(
            "epo",
            exchange.clone(),
            token_tier(),
            Duration::from_secs(60),
        ));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.get_token().await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "token-1");
        }
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state().await, TokenState::Valid);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let exchange = Arc::new(CountingExchange::new(Duration::from_secs(1200)));
        let manager = TokenManager::new("epo", exchange.clone(), token_tier(), Duration::from_secs(60));

        assert_eq!(manager.get_token().await.unwrap(), "token-1");
        manager.invalidate().await;
        assert_eq!(manager.state().await, TokenState::NoToken);
        assert_eq!(manager.get_token().await.unwrap(), "token-2");
    }

    #[tokio::test]
    async fn test_failed_exchange_does_not_poison_later_calls() {
        let flaky = Arc::new(CountingExchange {
            failing_calls: 1,
            ..CountingExchange::new(Duration::from_secs(1200))
        });
        let manager = TokenManager::new("epo", flaky.clone(), token_tier(), Duration::from_secs(60));

        assert!(matches!(
            manager.get_token().await,
            Err(Error::TokenAcquisition { .. })
        ));
        assert_eq!(manager.state().await, TokenState::NoToken);

        assert_eq!(manager.get_token().await.unwrap(), "token-2");
        assert_eq!(manager.get_token().await.unwrap(), "token-2");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_token_inside_margin_is_rejected() {
        let exchange = Arc::new(CountingExchange::new(Duration::from_secs(30)));
        let manager = TokenManager::new("epo", exchange, token_tier(), Duration::from_secs(60));
        assert!(manager.get_token().await.is_err());
        assert_eq!(manager.state().await, TokenState::NoToken);
    }

    #[test]
    fn test_token_response_accepts_string_expiry() {
        let body: TokenResponse =
            serde_json::from_str(r#"{"access_token":"abc","expires_in":"1199"}"#).unwrap();
        assert_eq!(body.expires_in, 1199);

        let body: TokenResponse =
            serde_json::from_str(r#"{"access_token":"abc","expires_in":3600}"#).unwrap();
        assert_eq!(body.expires_in, 3600);
    }
}
