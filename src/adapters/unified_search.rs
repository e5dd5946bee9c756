//! # Unified Search Adapter
//!
//! Concrete implementation of the [`SearchServicePort`] composing the
//! provider adapters, the fan-out orchestrator and the cache tiers.

use crate::client::providers::{
    EpoProvider, PatentsViewProvider, RegistryProvider, SearchMode, SearchQuery, TrademarkProvider,
    EPO_SOURCE,
};
use crate::client::{
    FanOutReport, OAuthClientCredentials, OrchestratorConfig, SearchOrchestrator, SnapshotOrigin,
    SnapshotRecord, TokenManager, UnifiedRecord,
};
use crate::ports::SearchServicePort;
use crate::repositories::{
    BookmarkRepository, CacheLayer, CacheTier, InMemoryBookmarkRepository, SearchCacheKey,
    TierStats,
};
use crate::resilience::{TimeoutConfig, TimeoutExt};
use crate::{Config, Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Unified facade over every configured patent and trademark registry
///
/// Searches are validated before any provider is contacted, then served from
/// the search-result tier or fanned out. Detail lookups are served from the
/// detail tier first, which holds both memoized direct fetches and the
/// snapshots written by recent searches.
pub struct UnifiedSearchService {
    orchestrator: SearchOrchestrator,
    cache: CacheLayer,
    bookmarks: Arc<dyn BookmarkRepository>,
    timeouts: TimeoutConfig,
}

impl std::fmt::Debug for UnifiedSearchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnifiedSearchService")
            .field("orchestrator", &self.orchestrator)
            .field("bookmarks", &self.bookmarks)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl UnifiedSearchService {
    /// Compose the service from already-built parts
    pub fn new(
        providers: Vec<Arc<dyn RegistryProvider>>,
        cache: CacheLayer,
        bookmarks: Arc<dyn BookmarkRepository>,
        config: OrchestratorConfig,
    ) -> Result<Self> {
        let timeouts = TimeoutConfig::from_provider_timeout(config.provider_timeout);
        let orchestrator = SearchOrchestrator::new(providers, config, cache.details.clone())?;

        Ok(Self {
            orchestrator,
            cache,
            bookmarks,
            timeouts,
        })
    }

    /// Build every enabled provider from configuration
    ///
    /// The EPO adapter is only registered when OPS credentials are present.
    pub fn from_config(config: &Config) -> Result<Self> {
        info!("Initializing unified search service");

        let client = config.search.http_client().build()?;
        let cache = CacheLayer::new(&config.cache)?;
        let retry = config.retry.policy();
        let timeouts = TimeoutConfig::from_provider_timeout(config.search.provider_timeout());

        let mut providers: Vec<Arc<dyn RegistryProvider>> = Vec::new();

        if config.epo.enabled {
            match (&config.epo.consumer_key, &config.epo.consumer_secret) {
                (Some(key), Some(secret)) if config.epo.has_credentials() => {
                    let exchange = OAuthClientCredentials::new(
                        EPO_SOURCE,
                        client.clone(),
                        config.epo.auth_url.clone(),
                        key.clone(),
                        secret.clone(),
                    );
                    let tokens = TokenManager::new(
                        EPO_SOURCE,
                        Arc::new(exchange),
                        cache.tokens.clone(),
                        config.cache.token.safety_margin(),
                    )
                    .with_exchange_timeout(timeouts.token_exchange);

                    providers.push(Arc::new(EpoProvider::new(
                        &config.epo,
                        client.clone(),
                        Arc::new(tokens),
                        retry.clone(),
                    )?));
                }
                _ => warn!("EPO provider enabled but no OPS credentials configured, skipping"),
            }
        }

        if config.patents_view.enabled {
            providers.push(Arc::new(PatentsViewProvider::new(
                &config.patents_view,
                client.clone(),
                retry.clone(),
            )?));
        }

        if config.trademark.enabled {
            providers.push(Arc::new(TrademarkProvider::new(
                &config.trademark,
                client,
                retry,
            )?));
        }

        if providers.is_empty() {
            warn!("No registry providers enabled; every search will return no results");
        }

        Self::new(
            providers,
            cache,
            Arc::new(InMemoryBookmarkRepository::new()),
            OrchestratorConfig::from(&config.search),
        )
    }

    /// Replace the bookmark store used for detail stamping
    #[must_use]
    pub fn with_bookmarks(mut self, bookmarks: Arc<dyn BookmarkRepository>) -> Self {
        self.bookmarks = bookmarks;
        self
    }

    #[must_use]
    pub fn bookmarks(&self) -> &Arc<dyn BookmarkRepository> {
        &self.bookmarks
    }

    /// Names of the registered providers, in dispatch order
    #[must_use]
    pub fn provider_names(&self) -> Vec<String> {
        self.orchestrator
            .providers()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Run a search, returning the fan-out report when providers were called
    ///
    /// The report is `None` when the result came from the search-result tier.
    pub async fn search_with_report(
        &self,
        mode: SearchMode,
        query: &SearchQuery,
    ) -> Result<(Vec<UnifiedRecord>, Option<FanOutReport>)> {
        query.validate()?;

        let key = SearchCacheKey::new(mode, query);
        if let Some(records) = self.cache.search.get(&key).await {
            debug!("Search cache hit for key {}", key);
            return Ok((records, None));
        }

        let (records, report) = self.orchestrator.fan_out(mode, query).await;
        self.cache.search.put(key, records.clone()).await;

        Ok((records, Some(report)))
    }

    async fn fetch_and_memoize(
        &self,
        provider: &Arc<dyn RegistryProvider>,
        id: &str,
    ) -> Result<Option<UnifiedRecord>> {
        let fetched = provider
            .fetch_detail(id)
            .with_logged_timeout(self.timeouts.detail_fetch, "fetch_detail")
            .await??;

        let Some(record) = fetched else {
            debug!("Provider {} has no record {}", provider.name(), id);
            return Ok(None);
        };

        let snapshot = SnapshotRecord::new(record.clone(), SnapshotOrigin::DetailFetch);
        if record.id != id {
            self.cache
                .details
                .put(record.id.clone(), snapshot.clone())
                .await;
        }
        self.cache.details.put(id.to_string(), snapshot).await;

        Ok(Some(record))
    }
}

#[async_trait]
impl SearchServicePort for UnifiedSearchService {
    #[instrument(skip(self), fields(keyword = %query.keyword, jurisdiction = %query.jurisdiction))]
    async fn search(&self, query: &SearchQuery) -> Result<Vec<UnifiedRecord>> {
        let (records, _) = self.search_with_report(SearchMode::Keyword, query).await?;
        Ok(records)
    }

    #[instrument(skip(self), fields(keyword = %query.keyword, jurisdiction = %query.jurisdiction))]
    async fn search_advanced(&self, query: &SearchQuery) -> Result<Vec<UnifiedRecord>> {
        let (records, _) = self.search_with_report(SearchMode::Advanced, query).await?;
        Ok(records)
    }

    #[instrument(skip(self))]
    async fn get_detail(&self, id: &str) -> Result<Option<UnifiedRecord>> {
        let id = id.trim();
        if id.is_empty() {
            return Err(Error::InvalidQuery {
                field: "id".to_string(),
                reason: "record id cannot be empty".to_string(),
            });
        }

        if let Some(snapshot) = self.cache.details.get(&id.to_string()).await {
            debug!("Detail cache hit for {} ({:?})", id, snapshot.origin);
            return Ok(Some(snapshot.record));
        }

        let Some(provider) = self
            .orchestrator
            .providers()
            .iter()
            .find(|p| p.owns_record_id(id))
        else {
            debug!("No provider claims record id {}", id);
            return Ok(None);
        };

        if !provider.supports_detail() {
            debug!(
                "Provider {} has no detail endpoint and {} is not in the snapshot cache",
                provider.name(),
                id
            );
            return Ok(None);
        }

        self.fetch_and_memoize(provider, id).await
    }

    #[instrument(skip(self))]
    async fn get_detail_for(&self, id: &str, principal: &str) -> Result<Option<UnifiedRecord>> {
        let Some(mut record) = self.get_detail(id).await? else {
            return Ok(None);
        };

        let bookmarked = self.bookmarks.is_bookmarked(principal, &record.id).await?;
        record.bookmarked = Some(bookmarked);
        Ok(Some(record))
    }

    async fn cache_stats(&self) -> TierStats {
        self.cache.stats().await
    }

    async fn clear_cache(&self, tier: Option<CacheTier>) -> Result<()> {
        info!(
            "Clearing cache tier: {}",
            tier.map_or("all", CacheTier::as_str)
        );
        self.cache.clear(tier).await;
        Ok(())
    }
}
