use crate::client::filter::FilterEngine;
use crate::client::providers::{RegistryProvider, SearchMode, SearchQuery};
use crate::client::{SnapshotOrigin, SnapshotRecord, UnifiedRecord};
use crate::config::SearchConfig;
use crate::repositories::BoundedCache;
use crate::{Error, Result};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Fan-out limits
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Deadline per provider, covering the wait for a pool permit and the call
    pub provider_timeout: Duration,
    /// Outbound calls allowed in flight across all searches
    pub max_concurrent_calls: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&SearchConfig::default())
    }
}

impl From<&SearchConfig> for OrchestratorConfig {
    fn from(config: &SearchConfig) -> Self {
        Self {
            provider_timeout: config.provider_timeout(),
            max_concurrent_calls: config.max_concurrent_calls,
        }
    }
}

/// How one provider fared during a fan-out
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "detail")]
pub enum ProviderOutcome {
    /// Returned this many records before filtering
    Succeeded(usize),
    Failed(String),
    TimedOut,
    /// Not called because it cannot serve the requested jurisdiction
    Skipped,
}

/// Per-provider diagnostics of a single fan-out
#[derive(Debug, Clone, Serialize)]
pub struct FanOutReport {
    /// Skipped providers first, then called providers in dispatch order
    pub outcomes: Vec<(String, ProviderOutcome)>,
    /// Records left after filtering
    pub total_records: usize,
    pub elapsed: Duration,
}

impl FanOutReport {
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, ProviderOutcome::Succeeded(_)))
            .count()
    }

    #[must_use]
    pub fn outcome(&self, provider: &str) -> Option<&ProviderOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == provider)
            .map(|(_, outcome)| outcome)
    }
}

/// Fans a query out to every eligible provider in parallel
///
/// A single semaphore bounds outbound calls across all concurrent searches.
/// Provider failures and timeouts are contained: the provider contributes
/// nothing and the remaining results are still returned. Every record that
/// survives filtering is snapshotted into the detail tier so detail views
/// can be served without another registry round trip.
pub struct SearchOrchestrator {
    providers: Vec<Arc<dyn RegistryProvider>>,
    config: OrchestratorConfig,
    pool: Arc<Semaphore>,
    details: Arc<BoundedCache<String, SnapshotRecord>>,
}

impl SearchOrchestrator {
    pub fn new(
        providers: Vec<Arc<dyn RegistryProvider>>,
        config: OrchestratorConfig,
        details: Arc<BoundedCache<String, SnapshotRecord>>,
    ) -> Result<Self> {
        if config.max_concurrent_calls == 0 {
            return Err(Error::InvalidConfig {
                field: "search.max_concurrent_calls".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        info!(
            "Search orchestrator initialized with {} providers: {:?}",
            providers.len(),
            providers.iter().map(|p| p.name()).collect::<Vec<_>>()
        );

        Ok(Self {
            pool: Arc::new(Semaphore::new(config.max_concurrent_calls)),
            providers,
            config,
            details,
        })
    }

    /// Registered providers in dispatch order
    #[must_use]
    pub fn providers(&self) -> &[Arc<dyn RegistryProvider>] {
        &self.providers
    }

    /// Permits currently free in the shared outbound pool
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.pool.available_permits()
    }

    /// Run `query` against every provider that serves its jurisdiction
    pub async fn fan_out(
        &self,
        mode: SearchMode,
        query: &SearchQuery,
    ) -> (Vec<UnifiedRecord>, FanOutReport) {
        let start_time = Instant::now();
        info!(
            "Starting fan-out for: {} (mode: {}, jurisdiction: {})",
            query.keyword, mode, query.jurisdiction
        );

        let mut outcomes = Vec::with_capacity(self.providers.len());
        let mut names = Vec::new();
        let mut tasks = Vec::new();

        for provider in &self.providers {
            if !provider.supports_jurisdiction(&query.jurisdiction) {
                debug!(
                    "Skipping provider {} for jurisdiction {}",
                    provider.name(),
                    query.jurisdiction
                );
                outcomes.push((provider.name().to_string(), ProviderOutcome::Skipped));
                continue;
            }

            let provider = provider.clone();
            let query = query.clone();
            let pool = self.pool.clone();
            let timeout_duration = self.config.provider_timeout;

            let provider_name = provider.name().to_string();
            let task = tokio::spawn(async move {
                let call = async {
                    let _permit = pool.acquire().await.map_err(|_| Error::PoolClosed)?;
                    provider.search(mode, &query).await
                };
                timeout(timeout_duration, call).await
            });

            names.push(provider_name);
            tasks.push(task);
        }

        let mut merged = Vec::new();
        for (provider_name, joined) in names.into_iter().zip(join_all(tasks).await) {
            match joined {
                Ok(Ok(Ok(records))) => {
                    info!(
                        "Provider {} returned {} results",
                        provider_name,
                        records.len()
                    );
                    outcomes.push((provider_name, ProviderOutcome::Succeeded(records.len())));
                    merged.extend(records);
                }
                Ok(Ok(Err(e))) => {
                    warn!("Provider {} failed: {}", provider_name, e);
                    outcomes.push((provider_name, ProviderOutcome::Failed(e.to_string())));
                }
                Ok(Err(_)) => {
                    warn!(
                        "Provider {} timed out after {:?}",
                        provider_name, self.config.provider_timeout
                    );
                    outcomes.push((provider_name, ProviderOutcome::TimedOut));
                }
                Err(e) => {
                    error!("Provider {} task failed: {}", provider_name, e);
                    outcomes.push((provider_name, ProviderOutcome::Failed(e.to_string())));
                }
            }
        }

        let records = FilterEngine::apply(merged, query);
        self.snapshot(&records).await;

        let report = FanOutReport {
            outcomes,
            total_records: records.len(),
            elapsed: start_time.elapsed(),
        };
        info!(
            "Fan-out completed: {} records from {} providers in {:?}",
            report.total_records,
            report.succeeded(),
            report.elapsed
        );

        (records, report)
    }

    async fn snapshot(&self, records: &[UnifiedRecord]) {
        for record in records {
            self.details
                .put(
                    record.id.clone(),
                    SnapshotRecord::new(record.clone(), SnapshotOrigin::Search),
                )
                .await;
        }
        if !records.is_empty() {
            debug!("Snapshotted {} records into the detail tier", records.len());
        }
    }
}

impl std::fmt::Debug for SearchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchOrchestrator")
            .field(
                "providers",
                &self.providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::providers::Jurisdiction;
    use crate::client::RecordKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behaviour {
        Records(Vec<UnifiedRecord>),
        Fail,
        Hang,
        Panic,
    }

    struct StubProvider {
        name: &'static str,
        only: Option<&'static str>,
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl StubProvider {
        fn new(name: &'static str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                name,
                only: None,
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }

        fn restricted(name: &'static str, only: &'static str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                name,
                only: Some(only),
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RegistryProvider for StubProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn record_kind(&self) -> RecordKind {
            RecordKind::Patent
        }

        fn supports_jurisdiction(&self, jurisdiction: &Jurisdiction) -> bool {
            self.only.map_or(true, |code| jurisdiction.is_all() || jurisdiction.matches(Some(code)))
        }

        fn owns_record_id(&self, _id: &str) -> bool {
            false
        }

        async fn search_by_keyword(&self, _query: &SearchQuery) -> Result<Vec<UnifiedRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behaviour {
                Behaviour::Records(records) => Ok(records.clone()),
                Behaviour::Fail => Err(Error::ProviderStatus {
                    provider: self.name.to_string(),
                    status: 500,
                    message: "boom".to_string(),
                }),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
                Behaviour::Panic => panic!("provider {} crashed", self.name),
            }
        }

        async fn search_advanced(&self, query: &SearchQuery) -> Result<Vec<UnifiedRecord>> {
            self.search_by_keyword(query).await
        }
    }

    fn records(source: &str, ids: &[&str]) -> Vec<UnifiedRecord> {
        ids.iter()
            .map(|id| {
                let mut record = UnifiedRecord::new(*id, RecordKind::Patent, source);
                record.jurisdiction = Some(id[..2].to_string());
                record
            })
            .collect()
    }

    fn details() -> Arc<BoundedCache<String, SnapshotRecord>> {
        Arc::new(BoundedCache::new("details", 100, Duration::from_secs(60)).unwrap())
    }

    fn config(timeout_secs: u64) -> OrchestratorConfig {
        OrchestratorConfig {
            provider_timeout: Duration::from_secs(timeout_secs),
            max_concurrent_calls: 4,
        }
    }

    #[tokio::test]
    async fn test_results_are_concatenated_in_dispatch_order() {
        let epo = StubProvider::new("epo", Behaviour::Records(records("epo", &["EP1", "EP2"])));
        let us = StubProvider::new("us", Behaviour::Records(records("us", &["US1", "US2", "US3"])));
        let providers: Vec<Arc<dyn RegistryProvider>> = vec![epo, us];
        let orchestrator = SearchOrchestrator::new(providers, config(5), details()).unwrap();

        let (records, report) = orchestrator
            .fan_out(SearchMode::Keyword, &SearchQuery::keyword("graphene"))
            .await;

        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["EP1", "EP2", "US1", "US2", "US3"]);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.total_records, 5);
    }

    #[tokio::test]
    async fn test_failure_is_contained() {
        let ok = StubProvider::new("ok", Behaviour::Records(records("ok", &["US1"])));
        let broken = StubProvider::new("broken", Behaviour::Fail);
        let providers: Vec<Arc<dyn RegistryProvider>> = vec![broken, ok];
        let orchestrator = SearchOrchestrator::new(providers, config(5), details()).unwrap();

        let (records, report) = orchestrator
            .fan_out(SearchMode::Keyword, &SearchQuery::keyword("x"))
            .await;

        assert_eq!(records.len(), 1);
        assert!(matches!(report.outcome("broken"), Some(ProviderOutcome::Failed(_))));
        assert_eq!(report.outcome("ok"), Some(&ProviderOutcome::Succeeded(1)));
    }

    #[tokio::test]
    async fn test_panicking_provider_is_reported_as_failed() {
        let crashing = StubProvider::new("crashing", Behaviour::Panic);
        let ok = StubProvider::new("ok", Behaviour::Records(records("ok", &["US1"])));
        let providers: Vec<Arc<dyn RegistryProvider>> = vec![crashing, ok];
        let orchestrator = SearchOrchestrator::new(providers, config(5), details()).unwrap();

        let (records, report) = orchestrator
            .fan_out(SearchMode::Keyword, &SearchQuery::keyword("x"))
            .await;

        assert_eq!(records.len(), 1);
        let names: Vec<_> = report.outcomes.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["crashing", "ok"]);
        assert!(matches!(report.outcome("crashing"), Some(ProviderOutcome::Failed(_))));
        assert_eq!(report.succeeded(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_contained() {
        let ok = StubProvider::new("ok", Behaviour::Records(records("ok", &["US1"])));
        let slow = StubProvider::new("slow", Behaviour::Hang);
        let providers: Vec<Arc<dyn RegistryProvider>> = vec![ok, slow];
        let orchestrator = SearchOrchestrator::new(providers, config(2), details()).unwrap();

        let (records, report) = orchestrator
            .fan_out(SearchMode::Advanced, &SearchQuery::keyword("x"))
            .await;

        assert_eq!(records.len(), 1);
        assert_eq!(report.outcome("slow"), Some(&ProviderOutcome::TimedOut));
    }

    #[tokio::test]
    async fn test_unsupported_jurisdiction_is_skipped() {
        let epo = StubProvider::restricted("epo", "EP", Behaviour::Records(records("epo", &["EP1"])));
        let us = StubProvider::restricted("us", "US", Behaviour::Records(records("us", &["US1"])));
        let providers: Vec<Arc<dyn RegistryProvider>> = vec![epo.clone(), us.clone()];
        let orchestrator = SearchOrchestrator::new(providers, config(5), details()).unwrap();

        let query = SearchQuery::keyword("x").with_jurisdiction("US");
        let (records, report) = orchestrator.fan_out(SearchMode::Advanced, &query).await;

        assert_eq!(records.len(), 1);
        assert_eq!(epo.calls.load(Ordering::SeqCst), 0);
        assert_eq!(us.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.outcome("epo"), Some(&ProviderOutcome::Skipped));
    }

    #[tokio::test]
    async fn test_filtered_records_are_snapshotted() {
        let mut tesla = records("us", &["US1"]);
        tesla[0].assignees = vec!["Tesla, Inc.".to_string()];
        let mut all = tesla.clone();
        all.extend(records("us", &["US2"]));

        let us = StubProvider::new("us", Behaviour::Records(all));
        let cache = details();
        let providers: Vec<Arc<dyn RegistryProvider>> = vec![us];
        let orchestrator = SearchOrchestrator::new(providers, config(5), cache.clone()).unwrap();

        let query = SearchQuery::keyword("battery").with_assignee("tesla");
        let (records, _) = orchestrator.fan_out(SearchMode::Advanced, &query).await;

        assert_eq!(records.len(), 1);
        let snapshot = cache.get(&"US1".to_string()).await.unwrap();
        assert_eq!(snapshot.origin, SnapshotOrigin::Search);
        assert!(cache.get(&"US2".to_string()).await.is_none());
    }

    #[tokio::test]
    async fn test_zero_pool_rejected() {
        let config = OrchestratorConfig {
            provider_timeout: Duration::from_secs(1),
            max_concurrent_calls: 0,
        };
        assert!(SearchOrchestrator::new(Vec::new(), config, details()).is_err());
    }
}
