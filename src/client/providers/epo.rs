use super::normalize::{clean_text, dedup_non_blank, parse_date, select_preferred, DocumentStatus};
use super::ensure_success;
use super::traits::{Jurisdiction, RegistryProvider, SearchQuery};
use crate::client::{RecordKind, TokenManager, UnifiedRecord};
use crate::config::EpoConfig;
use crate::resilience::{retry_with_policy, RetryPolicy};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use regex::Regex;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use roxmltree::{Document, Node};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

pub const EPO_SOURCE: &str = "epo";

/// European Patent Office Open Patent Services (OPS) adapter
///
/// Searches through the CQL `published-data/search/biblio` service and
/// fetches single documents through the `epodoc` biblio endpoint. Every
/// request carries a bearer token from the provider's [`TokenManager`].
pub struct EpoProvider {
    client: Client,
    base_url: String,
    tokens: Arc<TokenManager>,
    retry: RetryPolicy,
    page_size: u32,
}

impl EpoProvider {
    pub fn new(
        config: &EpoConfig,
        client: Client,
        tokens: Arc<TokenManager>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url).map_err(|e| Error::InvalidConfig {
            field: "epo.base_url".to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            client,
            base_url,
            tokens,
            retry,
            page_size: config.page_size,
        })
    }

    /// Free-text CQL: a phrase in the title, or a single word in title or abstract
    fn keyword_clause(keyword: &str) -> String {
        let keyword = keyword.trim().to_lowercase();
        if keyword.contains(char::is_whitespace) {
            format!("ti=\"{}\"", keyword.replace('"', ""))
        } else {
            format!("ti={keyword} or ab={keyword}")
        }
    }

    /// Build the structured CQL query for every constraint the query carries
    pub fn build_cql(query: &SearchQuery) -> String {
        let mut parts = Vec::new();

        let keyword = Self::keyword_clause(&query.keyword);
        parts.push(format!("({keyword})"));

        if let Jurisdiction::Code(code) = &query.jurisdiction {
            parts.push(format!("pn={code}"));
        }
        if let Some(assignee) = query.assignee_term() {
            parts.push(format!("pa={}", cql_term(assignee)));
        }
        if let Some(inventor) = query.inventor_term() {
            parts.push(format!("in={}", cql_term(inventor)));
        }

        if query.date_from.is_some() || query.date_to.is_some() {
            let from = query
                .date_from
                .map_or_else(|| "19000101".to_string(), |d| d.format("%Y%m%d").to_string());
            let to = query.date_to.unwrap_or_else(|| Utc::now().date_naive());
            parts.push(format!("pd within \"{from} {}\"", to.format("%Y%m%d")));
        }

        parts.join(" and ")
    }

    fn search_url(&self, cql: &str) -> String {
        format!(
            "{}/rest-services/published-data/search/biblio?q={}",
            self.base_url,
            urlencoding::encode(cql)
        )
    }

    fn biblio_url(&self, reference: &PublicationReference) -> String {
        format!(
            "{}/rest-services/published-data/publication/epodoc/{}/biblio",
            self.base_url,
            urlencoding::encode(&reference.epodoc())
        )
    }

    async fn run_search(&self, cql: String) -> Result<Vec<UnifiedRecord>> {
        let start_time = Instant::now();
        info!("Searching EPO OPS with CQL: {}", cql);

        let url = self.search_url(&cql);
        let range = format!("1-{}", self.page_size);
        let body = retry_with_policy(
            || self.get_xml(&url, Some(range.as_str())),
            &self.retry,
            "epo_search",
        )
        .await?;

        let Some(body) = body else {
            debug!("EPO returned no results for {}", cql);
            return Ok(Vec::new());
        };

        let records = parse_exchange_documents(&body)?;
        info!(
            "EPO search completed: {} records in {:?}",
            records.len(),
            start_time.elapsed()
        );
        Ok(records)
    }

    /// GET an XML resource; `Ok(None)` when OPS answers 404
    ///
    /// A 401 means the cached token was revoked early: drop it and try once
    /// more with a fresh one.
    async fn get_xml(&self, url: &str, range: Option<&str>) -> Result<Option<String>> {
        match self.send_once(url, range).await {
            Err(e) if e.is_unauthorized() => {
                warn!("EPO rejected the access token, refreshing");
                self.tokens.invalidate().await;
                self.send_once(url, range).await
            }
            other => other,
        }
    }

    async fn send_once(&self, url: &str, range: Option<&str>) -> Result<Option<String>> {
        let token = self.tokens.get_token().await?;

        let mut request = self
            .client
            .get(url)
            .bearer_auth(token)
            .header(ACCEPT, "application/xml");
        if let Some(range) = range {
            request = request.header("X-OPS-Range", range);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::transport(EPO_SOURCE, &e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(EPO_SOURCE, response).await?;

        let body = response
            .text()
            .await
            .map_err(|e| Error::transport(EPO_SOURCE, &e))?;
        Ok(Some(body))
    }
}

#[async_trait]
impl RegistryProvider for EpoProvider {
    fn name(&self) -> &str {
        EPO_SOURCE
    }

    fn record_kind(&self) -> RecordKind {
        RecordKind::Patent
    }

    fn supports_jurisdiction(&self, jurisdiction: &Jurisdiction) -> bool {
        match jurisdiction {
            Jurisdiction::All => true,
            Jurisdiction::Code(code) => code != "US",
        }
    }

    fn owns_record_id(&self, id: &str) -> bool {
        PublicationReference::parse(id).is_some_and(|r| r.country != "US")
    }

    fn supports_detail(&self) -> bool {
        true
    }

    async fn search_by_keyword(&self, query: &SearchQuery) -> Result<Vec<UnifiedRecord>> {
        self.run_search(Self::keyword_clause(&query.keyword)).await
    }

    async fn search_advanced(&self, query: &SearchQuery) -> Result<Vec<UnifiedRecord>> {
        self.run_search(Self::build_cql(query)).await
    }

    async fn fetch_detail(&self, id: &str) -> Result<Option<UnifiedRecord>> {
        let Some(reference) = PublicationReference::parse(id) else {
            debug!("{} is not an EPO publication number", id);
            return Ok(None);
        };

        let url = self.biblio_url(&reference);
        let body = retry_with_policy(|| self.get_xml(&url, None), &self.retry, "epo_biblio").await?;
        let Some(body) = body else {
            return Ok(None);
        };

        Ok(parse_exchange_documents(&body)?.into_iter().next())
    }
}

/// Country, number and optional kind of a publication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationReference {
    pub country: String,
    pub number: String,
    pub kind: Option<String>,
}

impl PublicationReference {
    /// Parse `EP1234567`, `ep 1234567 b1`, `WO2020/123456A1` and similar
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
        let pattern = PATTERN
            .get_or_init(|| Regex::new(r"^([A-Z]{2})(\d+)([A-Z]\d?)?$").ok())
            .as_ref()?;

        let compact: String = raw
            .chars()
            .filter(|c| !matches!(c, ' ' | '.' | '/' | ','))
            .collect::<String>()
            .to_ascii_uppercase();

        let captures = pattern.captures(&compact)?;
        Some(Self {
            country: captures.get(1)?.as_str().to_string(),
            number: captures.get(2)?.as_str().to_string(),
            kind: captures.get(3).map(|m| m.as_str().to_string()),
        })
    }

    /// Kind-less epodoc form, so the response carries every variant
    #[must_use]
    pub fn epodoc(&self) -> String {
        format!("{}{}", self.country, self.number)
    }
}

struct ExchangeDocument<'a, 'input> {
    country: String,
    number: String,
    kind: String,
    node: Node<'a, 'input>,
}

/// Map an OPS `exchange-documents` payload into one record per publication
///
/// Variants of the same publication (A1, A2, B1, ...) collapse into a single
/// record built from the most final variant.
pub fn parse_exchange_documents(xml: &str) -> Result<Vec<UnifiedRecord>> {
    let doc = Document::parse(xml)
        .map_err(|e| Error::parse(EPO_SOURCE, format!("failed to parse XML: {e}")))?;

    let mut groups: Vec<Vec<ExchangeDocument<'_, '_>>> = Vec::new();
    for node in doc
        .descendants()
        .filter(|n| n.has_tag_name("exchange-document"))
    {
        let (Some(country), Some(number)) = (node.attribute("country"), node.attribute("doc-number"))
        else {
            continue;
        };
        let document = ExchangeDocument {
            country: country.trim().to_ascii_uppercase(),
            number: number.trim().to_string(),
            kind: node.attribute("kind").unwrap_or_default().trim().to_string(),
            node,
        };

        match groups
            .iter_mut()
            .find(|g| {
                g.first()
                    .is_some_and(|d| d.country == document.country && d.number == document.number)
            })
        {
            Some(group) => group.push(document),
            None => groups.push(vec![document]),
        }
    }

    Ok(groups
        .iter()
        .filter_map(|variants| {
            select_preferred(variants, |d| DocumentStatus::from_kind_code(&d.kind))
        })
        .map(map_document)
        .collect())
}

fn map_document(document: &ExchangeDocument<'_, '_>) -> UnifiedRecord {
    let node = document.node;
    let mut record = UnifiedRecord::new(
        format!("{}{}", document.country, document.number),
        RecordKind::Patent,
        EPO_SOURCE,
    );

    record.title = preferred_language_text(node, "invention-title");
    record.jurisdiction = Some(document.country.clone());
    record.filing_date = reference_date(node, "application-reference");
    record.grant_date = reference_date(node, "publication-reference");
    record.assignees = party_names(node, "applicant", "applicant-name");
    record.inventors = party_names(node, "inventor", "inventor-name");

    let cpc = cpc_codes(node);
    let ipc = ipc_codes(node);
    record.classifications = if cpc.is_empty() { ipc.clone() } else { cpc.clone() };
    record.detail.ipc_classes = ipc;
    record.detail.cpc_classes = cpc;
    record.detail.abstract_text = preferred_language_text(node, "abstract");
    record.detail.status = clean_text(Some(document.kind.as_str()));

    record
}

fn descendants_named<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.descendants().filter(move |n| n.has_tag_name(name))
}

fn text_content(node: Node<'_, '_>) -> Option<String> {
    let text: Vec<&str> = node
        .descendants()
        .filter(Node::is_text)
        .filter_map(|n| n.text())
        .collect();
    clean_text(Some(text.join(" ").as_str()))
}

/// English text if present, else the first non-blank one
fn preferred_language_text(node: Node<'_, '_>, element: &'static str) -> Option<String> {
    let candidates: Vec<(Option<&str>, String)> = descendants_named(node, element)
        .filter_map(|n| text_content(n).map(|text| (n.attribute("lang"), text)))
        .collect();

    candidates
        .iter()
        .find(|(lang, _)| lang.is_some_and(|l| l.eq_ignore_ascii_case("en")))
        .or_else(|| candidates.first())
        .map(|(_, text)| text.clone())
}

fn reference_date(node: Node<'_, '_>, reference: &'static str) -> Option<NaiveDate> {
    descendants_named(node, reference)
        .flat_map(|r| descendants_named(r, "date"))
        .find_map(|d| parse_date(d.text()))
}

/// Party names, preferring the `epodoc` rendering when several formats exist
fn party_names(node: Node<'_, '_>, party: &'static str, name_element: &'static str) -> Vec<String> {
    let parties: Vec<Node<'_, '_>> = descendants_named(node, party).collect();
    let epodoc: Vec<&Node<'_, '_>> = parties
        .iter()
        .filter(|p| p.attribute("data-format") == Some("epodoc"))
        .collect();
    let chosen: Vec<&Node<'_, '_>> = if epodoc.is_empty() {
        parties.iter().collect()
    } else {
        epodoc
    };

    dedup_non_blank(
        chosen
            .into_iter()
            .flat_map(|p| descendants_named(*p, name_element))
            .filter_map(text_content)
            .map(|name| clean_party_name(&name)),
    )
}

/// Strip the trailing `[US]` residence marker and any dangling comma
fn clean_party_name(name: &str) -> String {
    static RESIDENCE: OnceLock<Option<Regex>> = OnceLock::new();
    let name = name.trim().trim_end_matches(',');
    let stripped = match RESIDENCE
        .get_or_init(|| Regex::new(r"\s*\[[A-Z]{2}\]\s*$").ok())
        .as_ref()
    {
        Some(pattern) => pattern.replace(name, "").into_owned(),
        None => name.to_string(),
    };
    stripped.trim().trim_end_matches(',').trim().to_string()
}

fn ipc_codes(node: Node<'_, '_>) -> Vec<String> {
    dedup_non_blank(
        descendants_named(node, "classification-ipcr")
            .flat_map(|c| descendants_named(c, "text"))
            .filter_map(|t| t.text())
            .filter_map(|text| {
                let mut tokens = text.split_whitespace();
                let class = tokens.next()?;
                let group = tokens.next().unwrap_or_default();
                Some(format!("{class}{group}"))
            }),
    )
}

fn cpc_codes(node: Node<'_, '_>) -> Vec<String> {
    dedup_non_blank(descendants_named(node, "patent-classification").filter_map(|c| {
        let field = |name: &'static str| -> Option<String> {
            descendants_named(c, name)
                .next()
                .and_then(|n| n.text())
                .map(|t| t.trim().to_string())
        };
        let section = field("section")?;
        let class = field("class")?;
        let subclass = field("subclass")?;
        let main_group = field("main-group")?;
        let subgroup = field("subgroup")?;
        Some(format!("{section}{class}{subclass}{main_group}/{subgroup}"))
    }))
}

fn cql_term(term: &str) -> String {
    let term = term.replace('"', "");
    if term.contains(char::is_whitespace) {
        format!("\"{term}\"")
    } else {
        term
    }
}
