use std::sync::Arc;
use std::time::Duration;

use chrono::Datelike;
use governor::clock::DefaultClock;
use governor::state::{direct::NotKeyed, InMemoryState};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use crate::config::SearchConfig;
use crate::error::{GapFinderError, Result};
use crate::layers::cache::SearchCache;
use crate::layers::resolution::Resolver;
use crate::layers::validation::PaperValidator;
use crate::layers::{Paper, SourceDatabase};

const SEMANTIC_SCHOLAR_BASE: &str = "https://api.semanticscholar.org";
const CROSSREF_BASE: &str = "https://api.crossref.org";
const USER_AGENT: &str = "gap-finder/0.1 (Academic Research Tool)";
const MAX_AUTHORS: usize = 10;
const MAX_ABSTRACT_CHARS: usize = 500;

pub fn current_year() -> i32 {
    chrono::Utc::now().year()
}

#[derive(Deserialize)]
struct SSResult {
    #[serde(default)]
    data: Vec<SSPaper>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SSPaper {
    paper_id: Option<String>,
    title: Option<String>,
    year: Option<i32>,
    venue: Option<String>,
    #[serde(rename = "abstract", default)]
    abstract_text: Option<String>,
    #[serde(default)]
    authors: Vec<SSAuthor>,
    external_ids: Option<SSExternalIds>,
    citation_count: Option<u32>,
    url: Option<String>,
}

#[derive(Deserialize)]
struct SSAuthor {
    name: Option<String>,
}

#[derive(Deserialize)]
struct SSExternalIds {
    #[serde(rename = "DOI")]
    doi: Option<String>,
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Enforces a minimum spacing between consecutive requests to one database.
#[derive(Clone)]
pub struct Throttle {
    limiter: Option<Arc<DirectLimiter>>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        // A zero interval yields no quota, which means no throttling.
        let limiter = Quota::with_period(interval)
            .map(|quota| Arc::new(RateLimiter::direct(quota.allow_burst(nonzero!(1u32)))));
        Self { limiter }
    }

    pub async fn wait(&self, service: SourceDatabase) {
        if let Some(limiter) = &self.limiter {
            if limiter.check().is_err() {
                tracing::info!("Rate limiting: waiting for {} request slot", service);
                limiter.until_ready().await;
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: config.retry_base_delay,
        }
    }

    /// base * 2^attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

async fn fetch_json<T, F>(
    service: SourceDatabase,
    throttle: &Throttle,
    policy: &RetryPolicy,
    timeout: Duration,
    build: F,
) -> Result<T>
where
    T: DeserializeOwned,
    F: Fn() -> RequestBuilder,
{
    let mut last_error = None;

    for attempt in 0..policy.max_attempts {
        throttle.wait(service).await;
        tracing::info!("Searching {} (attempt {}/{})", service, attempt + 1, policy.max_attempts);

        let error = match build().send().await {
            Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                tracing::warn!("{} rate limit hit on attempt {}", service, attempt + 1);
                GapFinderError::RateLimitExceeded { service: service.to_string() }
            }
            Ok(resp) if resp.status().is_server_error() => GapFinderError::HttpStatus {
                service: service.to_string(),
                status: resp.status().as_u16(),
            },
            Ok(resp) if !resp.status().is_success() => {
                return Err(GapFinderError::HttpStatus {
                    service: service.to_string(),
                    status: resp.status().as_u16(),
                });
            }
            Ok(resp) => {
                let body = resp.text().await?;
                return serde_json::from_str(&body)
                    .map_err(|e| GapFinderError::parse(format!("{} response", service), e.to_string()));
            }
            Err(e) if e.is_timeout() => GapFinderError::NetworkTimeout {
                service: service.to_string(),
                timeout,
            },
            Err(e) => GapFinderError::Http(e),
        };

        if attempt + 1 < policy.max_attempts {
            let delay = policy.delay_for(attempt);
            tracing::warn!("{} request failed: {}. Retrying in {:?}", service, error, delay);
            tokio::time::sleep(delay).await;
        }
        last_error = Some(error);
    }

    Err(last_error.unwrap_or_else(|| GapFinderError::Config("retry policy allows no attempts".to_string())))
}

fn build_http_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder().timeout(timeout).user_agent(USER_AGENT).build()?)
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn venue_or_preprint(venue: Option<String>) -> String {
    venue
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "Preprint".to_string())
}

pub struct SemanticScholarClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    throttle: Throttle,
    retry: RetryPolicy,
    timeout: Duration,
}

impl SemanticScholarClient {
    pub fn new(client: Client, api_key: Option<String>, throttle: Throttle, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            client,
            base_url: SEMANTIC_SCHOLAR_BASE.to_string(),
            api_key,
            throttle,
            retry,
            timeout,
        }
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub async fn search(&self, query: &str, limit: usize, current_year: i32) -> Result<Vec<Paper>> {
        let limit = limit.to_string();
        let url = Url::parse_with_params(
            &format!("{}/graph/v1/paper/search", self.base_url.trim_end_matches('/')),
            &[
                ("query", query),
                ("limit", limit.as_str()),
                ("offset", "0"),
                ("fields", "title,authors,year,venue,abstract,citationCount,externalIds,url"),
            ],
        )
        .map_err(|e| GapFinderError::Config(format!("invalid Semantic Scholar URL: {}", e)))?;

        tracing::debug!("Querying Semantic Scholar: {}", url);
        let results: SSResult = fetch_json(SourceDatabase::SemanticScholar, &self.throttle, &self.retry, self.timeout, || {
            let mut request = self.client.get(url.clone()).header("Accept", "application/json");
            if let Some(key) = &self.api_key {
                request = request.header("x-api-key", key);
            }
            request
        })
        .await?;

        let papers: Vec<Paper> = results
            .data
            .into_iter()
            .filter_map(|p| {
                let title = p.title?.trim().to_string();
                let year = p.year.unwrap_or(0);
                let doi = p.external_ids.and_then(|ids| ids.doi);
                Some(Paper {
                    id: Paper::derive_id(doi.as_deref(), p.paper_id.as_deref(), &title, year),
                    authors: p
                        .authors
                        .into_iter()
                        .take(MAX_AUTHORS)
                        .map(|a| a.name.unwrap_or_else(|| "Unknown".to_string()))
                        .collect(),
                    year,
                    venue: venue_or_preprint(p.venue),
                    abstract_text: truncate_chars(p.abstract_text.as_deref().unwrap_or(""), MAX_ABSTRACT_CHARS),
                    citations: p.citation_count.unwrap_or(0),
                    doi,
                    url: p.url,
                    source: SourceDatabase::SemanticScholar,
                    title,
                })
            })
            .filter(|p| PaperValidator::is_plausible(p, current_year))
            .collect();

        tracing::info!("Found {} valid papers from Semantic Scholar for: {}", papers.len(), query);
        Ok(papers)
    }
}

// Crossref works API structures
#[derive(Deserialize)]
struct CRResponse {
    message: CRMessage,
}

#[derive(Deserialize)]
struct CRMessage {
    #[serde(default)]
    items: Vec<CRWork>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CRWork {
    #[serde(default)]
    title: Vec<String>,
    #[serde(default)]
    author: Vec<CRAuthor>,
    published_print: Option<CRDate>,
    published_online: Option<CRDate>,
    created: Option<CRDate>,
    #[serde(default)]
    container_title: Vec<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    is_referenced_by_count: Option<u32>,
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(rename = "URL")]
    url: Option<String>,
}

#[derive(Deserialize)]
struct CRAuthor {
    given: Option<String>,
    family: Option<String>,
    name: Option<String>,
}

#[derive(Deserialize)]
struct CRDate {
    #[serde(rename = "date-parts", default)]
    date_parts: Vec<Vec<Option<i32>>>,
}

impl CRDate {
    fn year(&self) -> Option<i32> {
        self.date_parts.first().and_then(|parts| parts.first().copied().flatten())
    }
}

impl CRWork {
    fn year(&self) -> i32 {
        [&self.published_print, &self.published_online, &self.created]
            .into_iter()
            .flatten()
            .find_map(CRDate::year)
            .unwrap_or(0)
    }
}

/// Crossref abstracts are JATS XML fragments; this keeps only their text.
pub fn strip_markup(raw: &str) -> String {
    let mut reader = Reader::from_str(raw);
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) | Ok(Event::End(_)) | Ok(Event::Empty(_)) => text.push(' '),
            Ok(Event::Text(e)) => text.push_str(&String::from_utf8_lossy(&e.into_inner())),
            Ok(Event::CData(e)) => text.push_str(&String::from_utf8_lossy(&e.into_inner())),
            Ok(Event::GeneralRef(e)) => {
                text.push_str(&resolve_entity(&String::from_utf8_lossy(&e.into_inner())));
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("Abstract markup not well-formed at {}: {:?}", reader.buffer_position(), e);
                return strip_tags_loosely(raw);
            }
        }
    }

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn resolve_entity(name: &str) -> String {
    if let Some(code) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
        return u32::from_str_radix(code, 16).ok().and_then(char::from_u32).map(String::from).unwrap_or_default();
    }
    if let Some(code) = name.strip_prefix('#') {
        return code.parse::<u32>().ok().and_then(char::from_u32).map(String::from).unwrap_or_default();
    }
    quick_xml::escape::resolve_html5_entity(name)
        .map(str::to_string)
        .unwrap_or_else(|| format!("&{};", name))
}

fn strip_tags_loosely(raw: &str) -> String {
    let mut text = String::with_capacity(raw.len());
    let mut in_tag = false;
    for c in raw.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                text.push(' ');
            }
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct CrossrefClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    mailto: String,
    throttle: Throttle,
    retry: RetryPolicy,
    timeout: Duration,
    recent_years: i32,
}

impl CrossrefClient {
    pub fn new(
        client: Client,
        api_key: Option<String>,
        mailto: impl Into<String>,
        throttle: Throttle,
        retry: RetryPolicy,
        timeout: Duration,
        recent_years: i32,
    ) -> Self {
        Self {
            client,
            base_url: CROSSREF_BASE.to_string(),
            api_key,
            mailto: mailto.into(),
            throttle,
            retry,
            timeout,
            recent_years,
        }
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub async fn search(&self, query: &str, limit: usize, current_year: i32) -> Result<Vec<Paper>> {
        let rows = limit.to_string();
        let filter = format!("from-pub-date:{}", current_year - self.recent_years);
        let url = Url::parse_with_params(
            &format!("{}/works", self.base_url.trim_end_matches('/')),
            &[
                ("query", query),
                ("rows", rows.as_str()),
                (
                    "select",
                    "title,author,published-print,published-online,created,container-title,abstract,is-referenced-by-count,DOI,URL",
                ),
                ("filter", filter.as_str()),
                ("mailto", self.mailto.as_str()),
            ],
        )
        .map_err(|e| GapFinderError::Config(format!("invalid Crossref URL: {}", e)))?;

        tracing::debug!("Querying Crossref: {}", url);
        let response: CRResponse = fetch_json(SourceDatabase::Crossref, &self.throttle, &self.retry, self.timeout, || {
            let mut request = self.client.get(url.clone()).header("Accept", "application/json");
            if let Some(key) = &self.api_key {
                request = request.header("Crossref-Plus-API-Token", format!("Bearer {}", key));
            }
            request
        })
        .await?;

        let papers: Vec<Paper> = response
            .message
            .items
            .into_iter()
            .filter_map(|work| {
                let year = work.year();
                let title = work.title.first()?.trim().to_string();
                let authors = work
                    .author
                    .iter()
                    .take(MAX_AUTHORS)
                    .map(|a| match (&a.given, &a.family, &a.name) {
                        (_, _, Some(name)) if a.family.is_none() => name.trim().to_string(),
                        (given, family, _) => format!(
                            "{} {}",
                            given.as_deref().unwrap_or(""),
                            family.as_deref().unwrap_or("")
                        )
                        .trim()
                        .to_string(),
                    })
                    .filter(|name| !name.is_empty())
                    .collect();
                let abstract_text = work.abstract_text.as_deref().map(strip_markup).unwrap_or_default();
                Some(Paper {
                    id: Paper::derive_id(work.doi.as_deref(), None, &title, year),
                    authors,
                    year,
                    venue: venue_or_preprint(work.container_title.into_iter().next()),
                    abstract_text: truncate_chars(&abstract_text, MAX_ABSTRACT_CHARS),
                    citations: work.is_referenced_by_count.unwrap_or(0),
                    doi: work.doi,
                    url: work.url,
                    source: SourceDatabase::Crossref,
                    title,
                })
            })
            .filter(|p| PaperValidator::is_plausible(p, current_year))
            .collect();

        tracing::info!("Found {} valid papers from Crossref for: {}", papers.len(), query);
        Ok(papers)
    }
}

/// A database that could not be searched; the search still returns what the others found.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchWarning {
    pub source: SourceDatabase,
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct SearchOutcome {
    pub papers: Vec<Paper>,
    pub warnings: Vec<SearchWarning>,
}

pub struct SearchEngine {
    semantic_scholar: SemanticScholarClient,
    crossref: CrossrefClient,
    cache: SearchCache,
    per_source_limit: usize,
    max_results: usize,
}

impl SearchEngine {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let client = build_http_client(config.request_timeout)?;
        let retry = RetryPolicy::from_config(config);

        if config.semantic_scholar_api_key.is_none() {
            tracing::warn!("SEMANTIC_SCHOLAR_API_KEY not set; using the shared public rate limit");
        }

        Ok(Self::with_clients(
            SemanticScholarClient::new(
                client.clone(),
                config.semantic_scholar_api_key.clone(),
                Throttle::new(config.rate_limit_interval),
                retry,
                config.request_timeout,
            ),
            CrossrefClient::new(
                client,
                config.crossref_api_key.clone(),
                config.crossref_mailto.clone(),
                Throttle::new(config.rate_limit_interval),
                retry,
                config.request_timeout,
                config.recent_years,
            ),
            SearchCache::new(config.enable_cache, config.cache_duration, config.cache_max_entries),
            config.per_source_limit,
            config.max_results,
        ))
    }

    pub fn with_clients(
        semantic_scholar: SemanticScholarClient,
        crossref: CrossrefClient,
        cache: SearchCache,
        per_source_limit: usize,
        max_results: usize,
    ) -> Self {
        Self {
            semantic_scholar,
            crossref,
            cache,
            per_source_limit,
            max_results,
        }
    }

    /// Queries every database in turn. Never fails: a database error becomes a warning.
    pub async fn search_all(&mut self, query: &str) -> SearchOutcome {
        tracing::info!("Starting search for: {}", query);
        let year = current_year();
        let mut outcome = SearchOutcome::default();
        let mut merged = Vec::new();

        for source in [SourceDatabase::SemanticScholar, SourceDatabase::Crossref] {
            if let Some(cached) = self.cache.get(source, query, self.per_source_limit) {
                merged.extend(cached);
                continue;
            }

            let result = match source {
                SourceDatabase::SemanticScholar => self.semantic_scholar.search(query, self.per_source_limit, year).await,
                SourceDatabase::Crossref => self.crossref.search(query, self.per_source_limit, year).await,
            };

            match result {
                Ok(papers) => {
                    tracing::info!("{} returned {} papers", source, papers.len());
                    self.cache.insert(source, query, self.per_source_limit, papers.clone());
                    merged.extend(papers);
                }
                Err(e) => {
                    tracing::warn!("{} search failed: {}", source, e);
                    outcome.warnings.push(SearchWarning {
                        source,
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let unique = Resolver::deduplicate(merged);
        let mut ranked = Resolver::rank_by_relevance(unique, year);
        ranked.truncate(self.max_results);

        if outcome.warnings.is_empty() {
            tracing::info!("Search completed, {} unique papers", ranked.len());
        } else {
            tracing::warn!(
                "Search completed with {} failed source(s), {} unique papers",
                outcome.warnings.len(),
                ranked.len()
            );
        }
        outcome.papers = ranked;
        outcome
    }
}
