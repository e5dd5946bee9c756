//! The three named cache tiers shared by the orchestrator, the facade and
//! the token managers.

use super::cache::{BoundedCache, CacheStats};
use crate::client::providers::{SearchMode, SearchQuery};
use crate::client::{ProviderToken, SnapshotRecord, UnifiedRecord};
use crate::config::CacheConfig;
use crate::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Tier tag used in logs and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    SearchResults,
    Details,
    Tokens,
}

impl CacheTier {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SearchResults => "search_results",
            Self::Details => "details",
            Self::Tokens => "tokens",
        }
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic digest of a search mode and every query field
///
/// Text fields are hashed trimmed, so queries that reach providers identically
/// share a key; any other differing field produces a different key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchCacheKey(String);

impl SearchCacheKey {
    #[must_use]
    pub fn new(mode: SearchMode, query: &SearchQuery) -> Self {
        let jurisdiction = query.jurisdiction.to_string();
        let date_from = query.date_from.map(|d| d.to_string()).unwrap_or_default();
        let date_to = query.date_to.map(|d| d.to_string()).unwrap_or_default();
        let parts: [&str; 6] = [
            query.keyword.trim(),
            &jurisdiction,
            &date_from,
            &date_to,
            query.assignee_term().unwrap_or_default(),
            query.inventor_term().unwrap_or_default(),
        ];

        let mut hasher = Sha256::new();
        hasher.update(mode.to_string().as_bytes());
        for part in parts {
            // length prefix keeps ("ab", "c") and ("a", "bc") apart
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        let digest = hasher.finalize();
        Self(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SearchCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-tier statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub search_results: CacheStats,
    pub details: CacheStats,
    pub tokens: CacheStats,
}

/// Search-result, detail and token tiers behind shared handles
#[derive(Debug, Clone)]
pub struct CacheLayer {
    pub search: Arc<BoundedCache<SearchCacheKey, Vec<UnifiedRecord>>>,
    pub details: Arc<BoundedCache<String, SnapshotRecord>>,
    pub tokens: Arc<BoundedCache<String, ProviderToken>>,
}

impl CacheLayer {
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let search = BoundedCache::new(
            CacheTier::SearchResults.as_str(),
            config.search.capacity,
            config.search.ttl(),
        )?;
        let details = BoundedCache::new(
            CacheTier::Details.as_str(),
            config.detail.capacity,
            config.detail.ttl(),
        )?;
        // Token entries always carry their own lifetime; this default only
        // applies if one were ever stored without it.
        let tokens = BoundedCache::new(
            CacheTier::Tokens.as_str(),
            config.token.capacity,
            Duration::from_secs(3600),
        )?;

        Ok(Self {
            search: Arc::new(search),
            details: Arc::new(details),
            tokens: Arc::new(tokens),
        })
    }

    pub async fn stats(&self) -> TierStats {
        TierStats {
            search_results: self.search.stats().await,
            details: self.details.stats().await,
            tokens: self.tokens.stats().await,
        }
    }

    /// Empty one tier, or all of them when `tier` is `None`
    pub async fn clear(&self, tier: Option<CacheTier>) {
        match tier {
            Some(CacheTier::SearchResults) => self.search.clear().await,
            Some(CacheTier::Details) => self.details.clear().await,
            Some(CacheTier::Tokens) => self.tokens.clear().await,
            None => {
                self.search.clear().await;
                self.details.clear().await;
                self.tokens.clear().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_equal_queries_share_a_key() {
        let a = SearchQuery::keyword("graphene").with_jurisdiction("ep");
        let b = SearchQuery::keyword("graphene").with_jurisdiction("EP");
        assert_eq!(
            SearchCacheKey::new(SearchMode::Keyword, &a),
            SearchCacheKey::new(SearchMode::Keyword, &b)
        );
    }

    #[test]
    fn test_surrounding_whitespace_shares_a_key() {
        let plain = SearchQuery::keyword("graphene").with_assignee("Samsung");
        let padded = SearchQuery::keyword("  graphene ")
            .with_assignee(" Samsung  ")
            .with_inventor("   ");
        assert_eq!(
            SearchCacheKey::new(SearchMode::Advanced, &plain),
            SearchCacheKey::new(SearchMode::Advanced, &padded)
        );
    }

    #[test]
    fn test_any_field_changes_the_key() {
        let base = SearchQuery::keyword("graphene");
        let key = SearchCacheKey::new(SearchMode::Keyword, &base);

        let variants = [
            SearchQuery::keyword("graphite"),
            base.clone().with_jurisdiction("US"),
            base.clone().with_assignee("Samsung"),
            base.clone().with_inventor("Geim"),
            base.clone()
                .with_date_range(NaiveDate::from_ymd_opt(2020, 1, 1), None),
        ];
        for variant in &variants {
            assert_ne!(key, SearchCacheKey::new(SearchMode::Keyword, variant));
        }
        assert_ne!(key, SearchCacheKey::new(SearchMode::Advanced, &base));
    }

    #[test]
    fn test_key_is_hex_digest() {
        let key = SearchCacheKey::new(SearchMode::Keyword, &SearchQuery::keyword("x"));
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_layer_uses_configured_bounds() {
        let layer = CacheLayer::new(&CacheConfig::default()).unwrap();
        let stats = layer.stats().await;
        assert_eq!(stats.search_results.capacity, 5_000);
        assert_eq!(stats.details.capacity, 10_000);
        assert_eq!(layer.search.default_ttl(), Duration::from_secs(900));
        assert_eq!(layer.details.default_ttl(), Duration::from_secs(21_600));
    }
}
