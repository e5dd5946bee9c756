pub mod filter;
pub mod orchestrator;
pub mod providers;
pub mod token;

pub use filter::FilterEngine;
pub use orchestrator::{FanOutReport, OrchestratorConfig, ProviderOutcome, SearchOrchestrator};
pub use token::{CredentialExchange, OAuthClientCredentials, ProviderToken, TokenManager, TokenState};

use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// HTTP client configuration shared by the registry adapters
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout duration
    pub timeout: Duration,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("ip-search/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpClientConfig {
    /// Build a reqwest client from this configuration
    pub fn build(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent(&self.user_agent)
            .build()
            .map_err(|e| Error::InvalidConfig {
                field: "http".to_string(),
                reason: format!("failed to create HTTP client: {e}"),
            })
    }
}

/// Kind of IP right a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Patent,
    Trademark,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Patent => f.pad("patent"),
            Self::Trademark => f.pad("trademark"),
        }
    }
}

/// Fields only needed by the detail view
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDetail {
    pub abstract_text: Option<String>,
    pub ipc_classes: Vec<String>,
    pub cpc_classes: Vec<String>,
    /// Kind code (patents) or registry status code (trademarks)
    pub status: Option<String>,
    pub goods_and_services: Vec<String>,
}

/// A patent or trademark normalized across providers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedRecord {
    /// Provider-qualified identifier, e.g. `EP1234567`, `US10123456B2`, `TM-8812`
    pub id: String,
    pub kind: RecordKind,
    pub title: Option<String>,
    /// Two-letter office or country code
    pub jurisdiction: Option<String>,
    pub filing_date: Option<NaiveDate>,
    /// Grant date for patents, publication date when no grant is known
    pub grant_date: Option<NaiveDate>,
    /// Assignees for patents, owners for trademarks
    pub assignees: Vec<String>,
    pub inventors: Vec<String>,
    /// Classification codes (CPC for patents, Nice classes for trademarks)
    pub classifications: Vec<String>,
    /// Name of the provider that produced the record
    pub source: String,
    #[serde(default)]
    pub detail: RecordDetail,
    /// Set only on per-user detail views
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bookmarked: Option<bool>,
}

impl UnifiedRecord {
    /// Create an empty record for the given id, kind and source
    #[must_use]
    pub fn new(id: impl Into<String>, kind: RecordKind, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            title: None,
            jurisdiction: None,
            filing_date: None,
            grant_date: None,
            assignees: Vec::new(),
            inventors: Vec::new(),
            classifications: Vec::new(),
            source: source.into(),
            detail: RecordDetail::default(),
            bookmarked: None,
        }
    }

    /// The date used for range filtering: filing date, else grant/publication date
    #[must_use]
    pub fn reference_date(&self) -> Option<NaiveDate> {
        self.filing_date.or(self.grant_date)
    }
}

/// Where a detail-tier entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotOrigin {
    /// Written as a side effect of a search
    Search,
    /// Memoized result of a direct detail fetch
    DetailFetch,
}

/// Detail-view-ready record held in the detail tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub record: UnifiedRecord,
    pub origin: SnapshotOrigin,
    pub captured_at: DateTime<Utc>,
}

impl SnapshotRecord {
    #[must_use]
    pub fn new(record: UnifiedRecord, origin: SnapshotOrigin) -> Self {
        Self {
            record,
            origin,
            captured_at: Utc::now(),
        }
    }
}
