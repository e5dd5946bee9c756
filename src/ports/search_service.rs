//! # Search Service Port
//!
//! Defines the port interface consumed by whatever surface sits in front of
//! the engine (the bundled CLI, or a web controller layer).

use crate::client::providers::SearchQuery;
use crate::client::UnifiedRecord;
use crate::repositories::{CacheTier, TierStats};
use crate::Result;
use async_trait::async_trait;
use std::fmt::Debug;

/// Port interface for unified patent and trademark search
///
/// Implementations validate input before any provider is contacted, serve
/// repeated identical queries from the search-result tier, and degrade to
/// partial results when individual providers fail.
#[async_trait]
pub trait SearchServicePort: Send + Sync + Debug {
    /// Keyword search across every provider serving the query's jurisdiction
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidQuery` for a blank keyword or an inverted date
    /// range. Provider failures never surface here; they only shrink the
    /// result list.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<UnifiedRecord>>;

    /// Structured search using each provider's native advanced query form
    ///
    /// Same validation and failure policy as [`SearchServicePort::search`].
    async fn search_advanced(&self, query: &SearchQuery) -> Result<Vec<UnifiedRecord>>;

    /// Detail view for a record id
    ///
    /// `Ok(None)` means no provider knows the record (or, for snapshot-only
    /// providers, that it has not been seen in a recent search). Transport
    /// failures while fetching are returned as errors.
    async fn get_detail(&self, id: &str) -> Result<Option<UnifiedRecord>>;

    /// Detail view with the `bookmarked` flag stamped for `principal`
    async fn get_detail_for(&self, id: &str, principal: &str) -> Result<Option<UnifiedRecord>>;

    /// Hit/miss/eviction counters for every cache tier
    async fn cache_stats(&self) -> TierStats;

    /// Empty one tier, or all tiers when `tier` is `None`
    async fn clear_cache(&self, tier: Option<CacheTier>) -> Result<()>;
}
