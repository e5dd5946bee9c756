use crate::client::{RecordKind, UnifiedRecord};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Jurisdiction constraint of a query: a specific office code or the `ALL` wildcard
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Jurisdiction {
    #[default]
    All,
    Code(String),
}

impl Jurisdiction {
    /// Parse user input; blank or `ALL` (any case) is the wildcard
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("ALL") {
            Self::All
        } else {
            Self::Code(trimmed.to_ascii_uppercase())
        }
    }

    #[must_use]
    pub const fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Whether a record's jurisdiction satisfies this constraint
    #[must_use]
    pub fn matches(&self, code: Option<&str>) -> bool {
        match self {
            Self::All => true,
            Self::Code(wanted) => code.is_some_and(|c| c.trim().eq_ignore_ascii_case(wanted)),
        }
    }
}

impl fmt::Display for Jurisdiction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("ALL"),
            Self::Code(code) => f.write_str(code),
        }
    }
}

impl Serialize for Jurisdiction {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Jurisdiction {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// User search intent shared by every provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Free-text keyword, required
    pub keyword: String,
    #[serde(default)]
    pub jurisdiction: Jurisdiction,
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    #[serde(default)]
    pub date_to: Option<NaiveDate>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub inventor: Option<String>,
}

impl SearchQuery {
    /// Keyword-only query across all jurisdictions
    #[must_use]
    pub fn keyword(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_jurisdiction(mut self, jurisdiction: &str) -> Self {
        self.jurisdiction = Jurisdiction::parse(jurisdiction);
        self
    }

    #[must_use]
    pub fn with_date_range(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    #[must_use]
    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    #[must_use]
    pub fn with_inventor(mut self, inventor: impl Into<String>) -> Self {
        self.inventor = Some(inventor.into());
        self
    }

    /// Reject queries no provider should ever see
    pub fn validate(&self) -> Result<()> {
        if self.keyword.trim().is_empty() {
            return Err(Error::InvalidQuery {
                field: "keyword".to_string(),
                reason: "keyword cannot be empty".to_string(),
            });
        }

        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                return Err(Error::InvalidQuery {
                    field: "date_from".to_string(),
                    reason: format!("{from} is after {to}"),
                });
            }
        }

        Ok(())
    }

    /// Trimmed assignee constraint, `None` when blank
    #[must_use]
    pub fn assignee_term(&self) -> Option<&str> {
        non_blank(self.assignee.as_deref())
    }

    /// Trimmed inventor constraint, `None` when blank
    #[must_use]
    pub fn inventor_term(&self) -> Option<&str> {
        non_blank(self.inventor.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Which provider search entry point a request goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Keyword,
    Advanced,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keyword => f.write_str("keyword"),
            Self::Advanced => f.write_str("advanced"),
        }
    }
}

/// Capability implemented by every IP registry adapter
///
/// Adapters are stateless apart from the token manager they may hold and are
/// shared across concurrent searches behind an `Arc`.
#[async_trait]
pub trait RegistryProvider: Send + Sync {
    /// Unique name/identifier for this provider, used as the record source tag
    fn name(&self) -> &str;

    /// Kind of records this provider returns
    fn record_kind(&self) -> RecordKind;

    /// Whether the orchestrator should call this provider for the jurisdiction
    fn supports_jurisdiction(&self, jurisdiction: &Jurisdiction) -> bool;

    /// Whether a record id belongs to this provider's namespace
    fn owns_record_id(&self, id: &str) -> bool;

    /// Whether `fetch_detail` talks to a real by-id endpoint
    fn supports_detail(&self) -> bool {
        false
    }

    /// Native free-text search; zero hits is an empty list, not an error
    async fn search_by_keyword(&self, query: &SearchQuery) -> Result<Vec<UnifiedRecord>>;

    /// Native structured search built from the full filter set
    async fn search_advanced(&self, query: &SearchQuery) -> Result<Vec<UnifiedRecord>>;

    /// Direct by-id fetch; `Ok(None)` means the registry has no such record
    async fn fetch_detail(&self, _id: &str) -> Result<Option<UnifiedRecord>> {
        Err(Error::DetailNotSupported {
            provider: self.name().to_string(),
        })
    }

    /// Dispatch to the entry point for `mode`
    async fn search(&self, mode: SearchMode, query: &SearchQuery) -> Result<Vec<UnifiedRecord>> {
        match mode {
            SearchMode::Keyword => self.search_by_keyword(query).await,
            SearchMode::Advanced => self.search_advanced(query).await,
        }
    }
}
