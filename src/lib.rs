pub mod adapters;
pub mod client;
pub mod config;
pub mod error;
pub mod ports;
pub mod repositories;
pub mod resilience;

pub use adapters::UnifiedSearchService;
pub use client::providers::{Jurisdiction, RegistryProvider, SearchMode, SearchQuery};
pub use client::{
    FanOutReport, FilterEngine, ProviderOutcome, RecordKind, SearchOrchestrator, UnifiedRecord,
};
pub use config::{Config, ConfigOverrides};
pub use error::{Error, ErrorCategory, Result};
pub use ports::SearchServicePort;
pub use repositories::{BookmarkRepository, CacheLayer, CacheTier, InMemoryBookmarkRepository};
pub use resilience::{RetryConfig, RetryPolicy, TimeoutConfig, TimeoutExt};
