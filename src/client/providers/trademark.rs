use super::ensure_success;
use super::normalize::{clean_text, dedup_non_blank, parse_date};
use super::traits::{Jurisdiction, RegistryProvider, SearchQuery};
use crate::client::{RecordKind, UnifiedRecord};
use crate::config::TrademarkConfig;
use crate::resilience::{retry_with_policy, RetryPolicy};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Instant;
use tracing::info;
use url::Url;

pub const TRADEMARK_SOURCE: &str = "trademark";

/// Record ids issued by this adapter start with this prefix
pub const TRADEMARK_ID_PREFIX: &str = "TM-";

/// Trademark registry adapter
///
/// The registry only offers a paged search by mark name, owner country and
/// goods/services text. It has no by-id endpoint, so trademark detail views
/// are served from the snapshots taken when search results pass through.
pub struct TrademarkProvider {
    client: Client,
    search_url: Url,
    retry: RetryPolicy,
    page_size: u32,
}

impl TrademarkProvider {
    pub fn new(config: &TrademarkConfig, client: Client, retry: RetryPolicy) -> Result<Self> {
        let base = format!("{}/search", config.base_url.trim_end_matches('/'));
        let search_url = Url::parse(&base).map_err(|e| Error::InvalidConfig {
            field: "trademark.base_url".to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            client,
            search_url,
            retry,
            page_size: config.page_size,
        })
    }

    /// Search URL for a mark name and optional owner country
    pub fn build_search_url(&self, mark_name: &str, country: Option<&str>) -> Url {
        let mut url = self.search_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("markName", mark_name.trim());
            if let Some(country) = country {
                pairs.append_pair("country", country);
            }
            pairs
                .append_pair("page", "0")
                .append_pair("size", &self.page_size.to_string());
        }
        url
    }

    async fn fetch_page(&self, url: &Url) -> Result<Vec<TrademarkRow>> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::transport(TRADEMARK_SOURCE, &e))?;
        let response = ensure_success(TRADEMARK_SOURCE, response).await?;

        let text = response
            .text()
            .await
            .map_err(|e| Error::transport(TRADEMARK_SOURCE, &e))?;
        let page: TrademarkPage = serde_json::from_str(&text)
            .map_err(|e| Error::parse(TRADEMARK_SOURCE, format!("invalid JSON: {e}")))?;
        Ok(page.content)
    }

    async fn run_search(&self, url: Url) -> Result<Vec<UnifiedRecord>> {
        let start_time = Instant::now();
        info!("Searching trademark registry: {}", url);

        let rows = retry_with_policy(|| self.fetch_page(&url), &self.retry, "trademark_search").await?;
        let records: Vec<UnifiedRecord> = rows.into_iter().filter_map(map_trademark).collect();

        info!(
            "Trademark search completed: {} records in {:?}",
            records.len(),
            start_time.elapsed()
        );
        Ok(records)
    }
}

#[async_trait]
impl RegistryProvider for TrademarkProvider {
    fn name(&self) -> &str {
        TRADEMARK_SOURCE
    }

    fn record_kind(&self) -> RecordKind {
        RecordKind::Trademark
    }

    fn supports_jurisdiction(&self, _jurisdiction: &Jurisdiction) -> bool {
        true
    }

    fn owns_record_id(&self, id: &str) -> bool {
        id.trim()
            .get(..TRADEMARK_ID_PREFIX.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(TRADEMARK_ID_PREFIX))
    }

    async fn search_by_keyword(&self, query: &SearchQuery) -> Result<Vec<UnifiedRecord>> {
        self.run_search(self.build_search_url(&query.keyword, None))
            .await
    }

    async fn search_advanced(&self, query: &SearchQuery) -> Result<Vec<UnifiedRecord>> {
        let country = match &query.jurisdiction {
            Jurisdiction::All => None,
            Jurisdiction::Code(code) => Some(code.as_str()),
        };
        self.run_search(self.build_search_url(&query.keyword, country))
            .await
    }
}

#[derive(Debug, Deserialize)]
struct TrademarkPage {
    #[serde(default)]
    content: Vec<TrademarkRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrademarkRow {
    id: Option<StringOrNumber>,
    mark_name: Option<String>,
    filing_date: Option<String>,
    registration_date: Option<String>,
    status_code: Option<String>,
    #[serde(default)]
    owners: Vec<TrademarkOwner>,
    #[serde(default)]
    international_classes: Vec<ClassEntry>,
    #[serde(default)]
    goods_and_services: Vec<GoodsAndServices>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrademarkOwner {
    owner_name: Option<String>,
    owner_country: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoodsAndServices {
    description: Option<String>,
}

/// Ids and class codes arrive as either JSON strings or numbers
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Text(String),
    Number(i64),
}

impl StringOrNumber {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClassEntry {
    Plain(StringOrNumber),
    Object {
        #[serde(alias = "classNumber", alias = "code")]
        class_number: Option<StringOrNumber>,
    },
}

impl ClassEntry {
    fn into_code(self) -> Option<String> {
        match self {
            Self::Plain(value) => Some(value.into_string()),
            Self::Object { class_number } => class_number.map(StringOrNumber::into_string),
        }
    }
}

/// Rows without an id cannot be addressed later and are dropped
fn map_trademark(row: TrademarkRow) -> Option<UnifiedRecord> {
    let raw_id = clean_text(row.id.map(StringOrNumber::into_string).as_deref())?;

    let mut record = UnifiedRecord::new(
        format!("{TRADEMARK_ID_PREFIX}{raw_id}"),
        RecordKind::Trademark,
        TRADEMARK_SOURCE,
    );
    record.title = clean_text(row.mark_name.as_deref());
    record.jurisdiction = row
        .owners
        .iter()
        .find_map(|o| clean_text(o.owner_country.as_deref()))
        .map(|c| c.to_ascii_uppercase());
    record.filing_date = parse_date(row.filing_date.as_deref());
    record.grant_date = parse_date(row.registration_date.as_deref());
    record.assignees = dedup_non_blank(row.owners.iter().filter_map(|o| o.owner_name.as_deref()));
    record.classifications = dedup_non_blank(
        row.international_classes
            .into_iter()
            .filter_map(ClassEntry::into_code),
    );
    record.detail.status = clean_text(row.status_code.as_deref());
    record.detail.goods_and_services = dedup_non_blank(
        row.goods_and_services
            .iter()
            .filter_map(|g| g.description.as_deref()),
    );

    Some(record)
}
