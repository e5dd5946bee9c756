use super::ensure_success;
use super::normalize::{clean_text, dedup_non_blank, parse_date};
use super::traits::{Jurisdiction, RegistryProvider, SearchQuery};
use crate::client::{RecordKind, UnifiedRecord};
use crate::config::PatentsViewConfig;
use crate::resilience::{retry_with_policy, RetryPolicy};
use crate::{Error, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{debug, info};
use url::Url;

pub const PATENTS_VIEW_SOURCE: &str = "patents_view";

const RESULT_FIELDS: &[&str] = &[
    "patent_id",
    "patent_title",
    "patent_abstract",
    "patent_date",
    "patent_earliest_application_date",
    "wipo_kind",
    "assignees.assignee_organization",
    "assignees.assignee_individual_name_first",
    "assignees.assignee_individual_name_last",
    "inventors.inventor_name_first",
    "inventors.inventor_name_last",
    "cpc_current.cpc_class",
    "cpc_current.cpc_subclass",
    "cpc_current.cpc_group",
];

/// USPTO PatentsView search API adapter (US grants only)
pub struct PatentsViewProvider {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    retry: RetryPolicy,
    page_size: u32,
}

impl PatentsViewProvider {
    pub fn new(config: &PatentsViewConfig, client: Client, retry: RetryPolicy) -> Result<Self> {
        let endpoint = Url::parse(&config.base_url).map_err(|e| Error::InvalidConfig {
            field: "patents_view.base_url".to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            retry,
            page_size: config.page_size,
        })
    }

    fn keyword_condition(keyword: &str) -> Value {
        let keyword = keyword.trim();
        json!({
            "_or": [
                {"_text_any": {"patent_title": keyword}},
                {"_text_any": {"patent_abstract": keyword}},
            ]
        })
    }

    /// Free-text request over title and abstract
    pub fn build_keyword_request(&self, query: &SearchQuery) -> Value {
        self.request_body(Self::keyword_condition(&query.keyword))
    }

    /// Structured request pushing every filter down to the API
    pub fn build_advanced_request(&self, query: &SearchQuery) -> Value {
        let mut conditions = vec![Self::keyword_condition(&query.keyword)];

        if let Some(from) = query.date_from {
            conditions.push(json!({"_gte": {"patent_earliest_application_date": from.to_string()}}));
        }
        if let Some(to) = query.date_to {
            conditions.push(json!({"_lte": {"patent_earliest_application_date": to.to_string()}}));
        }
        if let Some(assignee) = query.assignee_term() {
            conditions.push(json!({"_text_any": {"assignees.assignee_organization": assignee}}));
        }
        if let Some(inventor) = query.inventor_term() {
            conditions.push(json!({"_text_any": {"inventors.inventor_name_last": inventor}}));
        }

        self.request_body(json!({ "_and": conditions }))
    }

    /// Exact lookup over every id form a caller may have used
    fn build_detail_request(candidates: &[String]) -> Value {
        let alternatives: Vec<Value> = candidates
            .iter()
            .map(|id| json!({"patent_id": id}))
            .collect();
        json!({
            "q": {"_or": alternatives},
            "f": RESULT_FIELDS,
            "o": {"size": candidates.len()},
        })
    }

    fn request_body(&self, condition: Value) -> Value {
        json!({
            "q": condition,
            "f": RESULT_FIELDS,
            "o": {"size": self.page_size},
        })
    }

    async fn post(&self, body: &Value) -> Result<Vec<PatentsViewPatent>> {
        let mut request = self.client.post(self.endpoint.clone()).json(body);
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::transport(PATENTS_VIEW_SOURCE, &e))?;
        let response = ensure_success(PATENTS_VIEW_SOURCE, response).await?;

        let text = response
            .text()
            .await
            .map_err(|e| Error::transport(PATENTS_VIEW_SOURCE, &e))?;
        let parsed: PatentsViewResponse = serde_json::from_str(&text)
            .map_err(|e| Error::parse(PATENTS_VIEW_SOURCE, format!("invalid JSON: {e}")))?;

        if parsed.error {
            return Err(Error::parse(
                PATENTS_VIEW_SOURCE,
                "response flagged error=true",
            ));
        }
        Ok(parsed.patents.unwrap_or_default())
    }

    async fn run_search(&self, body: Value, operation: &str) -> Result<Vec<UnifiedRecord>> {
        let start_time = Instant::now();
        debug!("PatentsView request: {}", body);

        let patents = retry_with_policy(|| self.post(&body), &self.retry, operation).await?;
        let returned = patents.len();
        let records: Vec<UnifiedRecord> = patents.into_iter().filter_map(map_patent).collect();
        if records.len() < returned {
            debug!("Skipped {} PatentsView rows without patent_id", returned - records.len());
        }

        info!(
            "PatentsView search completed: {} records in {:?}",
            records.len(),
            start_time.elapsed()
        );
        Ok(records)
    }
}

#[async_trait]
impl RegistryProvider for PatentsViewProvider {
    fn name(&self) -> &str {
        PATENTS_VIEW_SOURCE
    }

    fn record_kind(&self) -> RecordKind {
        RecordKind::Patent
    }

    fn supports_jurisdiction(&self, jurisdiction: &Jurisdiction) -> bool {
        match jurisdiction {
            Jurisdiction::All => true,
            Jurisdiction::Code(code) => code == "US",
        }
    }

    fn owns_record_id(&self, id: &str) -> bool {
        let id = id.trim().to_ascii_uppercase();
        id.starts_with("US") || (!id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
    }

    fn supports_detail(&self) -> bool {
        true
    }

    async fn search_by_keyword(&self, query: &SearchQuery) -> Result<Vec<UnifiedRecord>> {
        info!("Searching PatentsView for keyword: {}", query.keyword);
        self.run_search(self.build_keyword_request(query), "patents_view_search")
            .await
    }

    async fn search_advanced(&self, query: &SearchQuery) -> Result<Vec<UnifiedRecord>> {
        info!("Advanced PatentsView search: {:?}", query);
        self.run_search(self.build_advanced_request(query), "patents_view_advanced")
            .await
    }

    async fn fetch_detail(&self, id: &str) -> Result<Option<UnifiedRecord>> {
        let candidates = id_candidates(id);
        if candidates.is_empty() {
            return Ok(None);
        }

        let body = Self::build_detail_request(&candidates);
        let patents = retry_with_policy(|| self.post(&body), &self.retry, "patents_view_detail").await?;

        // Prefer the hit for the most specific candidate
        let best = candidates.iter().find_map(|candidate| {
            patents
                .iter()
                .find(|p| p.patent_id.as_deref().map(str::trim) == Some(candidate.as_str()))
        });
        let fallback = || {
            patents
                .iter()
                .find(|p| clean_text(p.patent_id.as_deref()).is_some())
        };
        Ok(best.or_else(fallback).cloned().and_then(map_patent))
    }
}

/// Every `patent_id` form an incoming id may correspond to, most specific first
///
/// `US10123456B2`, `US10123456` and `10123456` all reduce to the bare number
/// the API indexes; the original spelling is kept as a fallback.
pub fn id_candidates(raw: &str) -> Vec<String> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(pattern) = PATTERN
        .get_or_init(|| Regex::new(r"^(?:US)?(RE|PP|[DHT])?(\d+)(?:[A-Z]\d?)?$").ok())
        .as_ref()
    else {
        return Vec::new();
    };

    let normalized: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | ',' | '-' | '/'))
        .collect::<String>()
        .to_ascii_uppercase();
    if normalized.is_empty() {
        return Vec::new();
    }

    let mut candidates = Vec::new();
    if let Some(captures) = pattern.captures(&normalized) {
        let prefix = captures.get(1).map_or("", |m| m.as_str());
        if let Some(digits) = captures.get(2) {
            candidates.push(format!("{prefix}{}", digits.as_str()));
        }
    }
    candidates.push(normalized);
    dedup_non_blank(candidates)
}

#[derive(Debug, Deserialize)]
struct PatentsViewResponse {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    patents: Option<Vec<PatentsViewPatent>>,
}

#[derive(Debug, Clone, Deserialize)]
struct PatentsViewPatent {
    patent_id: Option<String>,
    patent_title: Option<String>,
    patent_abstract: Option<String>,
    patent_date: Option<String>,
    patent_earliest_application_date: Option<String>,
    wipo_kind: Option<String>,
    #[serde(default)]
    assignees: Option<Vec<PatentsViewAssignee>>,
    #[serde(default)]
    inventors: Option<Vec<PatentsViewInventor>>,
    #[serde(default)]
    cpc_current: Option<Vec<PatentsViewCpc>>,
}

#[derive(Debug, Clone, Deserialize)]
struct PatentsViewAssignee {
    assignee_organization: Option<String>,
    assignee_individual_name_first: Option<String>,
    assignee_individual_name_last: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct PatentsViewInventor {
    inventor_name_first: Option<String>,
    inventor_name_last: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct PatentsViewCpc {
    cpc_subclass: Option<String>,
    cpc_group: Option<String>,
}

fn full_name(first: Option<&str>, last: Option<&str>) -> String {
    format!("{} {}", first.unwrap_or_default(), last.unwrap_or_default())
}

/// Rows without a `patent_id` have no stable identity and are dropped
fn map_patent(patent: PatentsViewPatent) -> Option<UnifiedRecord> {
    let number = clean_text(patent.patent_id.as_deref())?;
    let kind = clean_text(patent.wipo_kind.as_deref());
    let id = format!("US{number}{}", kind.as_deref().unwrap_or_default());

    let mut record = UnifiedRecord::new(id, RecordKind::Patent, PATENTS_VIEW_SOURCE);
    record.title = clean_text(patent.patent_title.as_deref());
    record.jurisdiction = Some("US".to_string());
    record.filing_date = parse_date(patent.patent_earliest_application_date.as_deref());
    record.grant_date = parse_date(patent.patent_date.as_deref());

    record.assignees = dedup_non_blank(patent.assignees.unwrap_or_default().iter().map(|a| {
        match clean_text(a.assignee_organization.as_deref()) {
            Some(organization) => organization,
            None => full_name(
                a.assignee_individual_name_first.as_deref(),
                a.assignee_individual_name_last.as_deref(),
            ),
        }
    }));
    record.inventors = dedup_non_blank(
        patent
            .inventors
            .unwrap_or_default()
            .iter()
            .map(|i| full_name(i.inventor_name_first.as_deref(), i.inventor_name_last.as_deref())),
    );

    let cpc = dedup_non_blank(
        patent
            .cpc_current
            .unwrap_or_default()
            .iter()
            .filter_map(|c| c.cpc_group.clone().or_else(|| c.cpc_subclass.clone())),
    );
    record.classifications.clone_from(&cpc);
    record.detail.cpc_classes = cpc;
    record.detail.abstract_text = clean_text(patent.patent_abstract.as_deref());
    record.detail.status = kind;

    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn provider() -> PatentsViewProvider {
        PatentsViewProvider::new(
            &PatentsViewConfig::default(),
            Client::new(),
            RetryPolicy::default(),
        )
        .unwrap()
    }

    const RESPONSE: &str = r#"{
        "error": false,
        "count": 2,
        "total_hits": 2,
        "patents": [
            {
                "patent_id": "10123456",
                "patent_title": "Battery pack thermal management",
                "patent_abstract": "A battery pack   with cooling.",
                "patent_date": "2018-11-13",
                "patent_earliest_application_date": "2016-04-01",
                "wipo_kind": "B2",
                "assignees": [
                    {"assignee_organization": "Tesla, Inc."},
                    {"assignee_organization": null, "assignee_individual_name_first": "Jane", "assignee_individual_name_last": "Doe"}
                ],
                "inventors": [
                    {"inventor_name_first": "Elon", "inventor_name_last": "Musk"},
                    {"inventor_name_first": null, "inventor_name_last": "  "}
                ],
                "cpc_current": [
                    {"cpc_class": "H01", "cpc_subclass": "H01M", "cpc_group": "H01M10/613"},
                    {"cpc_class": "H01", "cpc_subclass": "H01M", "cpc_group": "H01M10/613"}
                ]
            },
            {"patent_id": "9999999", "patent_title": null}
        ]
    }"#;

    #[test]
    fn test_map_full_record() {
        let parsed: PatentsViewResponse = serde_json::from_str(RESPONSE).unwrap();
        let records: Vec<_> = parsed.patents.unwrap().into_iter().filter_map(map_patent).collect();

        let first = &records[0];
        assert_eq!(first.id, "US10123456B2");
        assert_eq!(first.jurisdiction.as_deref(), Some("US"));
        assert_eq!(first.filing_date, NaiveDate::from_ymd_opt(2016, 4, 1));
        assert_eq!(first.grant_date, NaiveDate::from_ymd_opt(2018, 11, 13));
        assert_eq!(first.assignees, vec!["Tesla, Inc.", "Jane Doe"]);
        assert_eq!(first.inventors, vec!["Elon Musk"]);
        assert_eq!(first.classifications, vec!["H01M10/613"]);
        assert_eq!(
            first.detail.abstract_text.as_deref(),
            Some("A battery pack with cooling.")
        );
    }

    #[test]
    fn test_map_sparse_record_uses_empty_values() {
        let parsed: PatentsViewResponse = serde_json::from_str(RESPONSE).unwrap();
        let sparse = map_patent(parsed.patents.unwrap().remove(1)).unwrap();
        assert_eq!(sparse.id, "US9999999");
        assert!(sparse.title.is_none());
        assert!(sparse.assignees.is_empty());
        assert!(sparse.detail.status.is_none());
    }

    #[test]
    fn test_rows_without_patent_id_are_dropped() {
        let parsed: PatentsViewResponse = serde_json::from_str(
            r#"{"error": false, "patents": [
                {"patent_id": null, "wipo_kind": "B2", "patent_title": "Null id"},
                {"wipo_kind": "B2", "patent_title": "Missing id"},
                {"patent_id": "  ", "patent_title": "Blank id"},
                {"patent_id": " 10111111 ", "wipo_kind": "B1"}
            ]}"#,
        )
        .unwrap();

        let ids: Vec<_> = parsed
            .patents
            .unwrap()
            .into_iter()
            .filter_map(map_patent)
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["US10111111B1"]);
    }

    #[test]
    fn test_keyword_request_shape() {
        let body = provider().build_keyword_request(&SearchQuery::keyword("graphene"));
        assert_eq!(
            body["q"]["_or"][0]["_text_any"]["patent_title"],
            "graphene"
        );
        assert_eq!(body["o"]["size"], 1000);
        assert!(body["f"]
            .as_array()
            .unwrap()
            .iter()
            .any(|f| f == "patent_earliest_application_date"));
    }

    #[test]
    fn test_advanced_request_pushes_filters_down() {
        let query = SearchQuery::keyword("battery")
            .with_assignee("Tesla")
            .with_inventor("Musk")
            .with_date_range(NaiveDate::from_ymd_opt(2015, 1, 1), NaiveDate::from_ymd_opt(2020, 1, 1));
        let body = provider().build_advanced_request(&query);
        let conditions = body["q"]["_and"].as_array().unwrap();

        assert_eq!(conditions.len(), 5);
        assert_eq!(
            conditions[1]["_gte"]["patent_earliest_application_date"],
            "2015-01-01"
        );
        assert_eq!(
            conditions[3]["_text_any"]["assignees.assignee_organization"],
            "Tesla"
        );
        assert_eq!(
            conditions[4]["_text_any"]["inventors.inventor_name_last"],
            "Musk"
        );
    }

    #[test]
    fn test_id_candidates() {
        assert_eq!(id_candidates("US10123456B2"), vec!["10123456", "US10123456B2"]);
        assert_eq!(id_candidates("10123456"), vec!["10123456"]);
        assert_eq!(id_candidates("usD900000S"), vec!["D900000", "USD900000S"]);
        assert!(id_candidates("  ").is_empty());
    }

    #[test]
    fn test_owns_us_and_numeric_ids() {
        let provider = provider();
        assert!(provider.owns_record_id("US10123456B2"));
        assert!(provider.owns_record_id("10123456"));
        assert!(!provider.owns_record_id("EP3123456"));
        assert!(!provider.owns_record_id("TM-42"));
    }
}
