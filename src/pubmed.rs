//! PubMed fetch step.
//!
//! Runs rendered search strings against NCBI E-utilities (`esearch` for the
//! PMID list, `esummary` for metadata) and dumps each result set as a JSONL
//! record file named `<sanitized-query-id>_PubMed.jsonl`.
//!
//! E-utilities return at most 10,000 ids per search. Hits beyond that are
//! lost; the fetcher compares the reported hit count with the ceiling and
//! flags truncated result sets so a smaller increment can be chosen.

use crate::error::{OptionExt, PubmetaError, Result};
use crate::query::QueryGenerator;
use crate::record::{Record, RecordTable};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

/// E-utilities base URL
pub const EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Hard ceiling on records returned per search
pub const MAX_RECORDS_PER_QUERY: usize = 10_000;

/// Source tag appended to record file names
pub const SOURCE_NAME: &str = "PubMed";

/// Ids per esummary request
const SUMMARY_BATCH_SIZE: usize = 200;

/// Tool name sent to NCBI
const TOOL_NAME: &str = "pubmeta";

/// Fetch configuration
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// E-utilities base URL
    pub base_url: String,
    /// NCBI API key, raises the quota from 3 to 10 requests per second
    pub api_key: Option<String>,
    /// Contact email sent with each request
    pub email: Option<String>,
    /// Maximum requests in flight
    pub max_concurrent: usize,
    /// Ids requested per search, capped at [`MAX_RECORDS_PER_QUERY`]
    pub max_records: usize,
    /// Retries on rate limiting
    pub max_retries: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: EUTILS_BASE_URL.to_string(),
            api_key: std::env::var("NCBI_API_KEY").ok().filter(|k| !k.is_empty()),
            email: None,
            max_concurrent: 3,
            max_records: MAX_RECORDS_PER_QUERY,
            max_retries: 3,
        }
    }
}

/// Outcome of fetching one query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchReport {
    pub query_id: String,
    pub path: PathBuf,
    /// Hits reported by the source
    pub total_hits: usize,
    /// Records written to `path`
    pub written: usize,
    /// More hits than the per-query ceiling allows
    pub truncated: bool,
}

/// Runs one search expression and writes the result set to a record file.
#[allow(async_fn_in_trait)]
pub trait RecordFetcher {
    async fn fetch(&self, query_id: &str, expression: &str, output: &Path) -> Result<FetchReport>;
}

/// Replace every character that is not alphanumeric or `_` with `_`
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Record file path for a query id
pub fn record_path(dir: &Path, query_id: &str) -> PathBuf {
    dir.join(format!("{}_{}.jsonl", sanitize_filename(query_id), SOURCE_NAME))
}

/// Fetch every generated query into `output_dir`, at most `max_concurrent` at a time.
///
/// Requires generated queries. A query that fails is logged and skipped;
/// the call returns once every fetch has finished, reports in query order.
pub async fn scrape_pubmed<F: RecordFetcher>(
    generator: &QueryGenerator,
    fetcher: &F,
    output_dir: &Path,
    max_concurrent: usize,
) -> Result<Vec<FetchReport>> {
    let search_strings = generator.generate_search_strings()?;
    std::fs::create_dir_all(output_dir)?;

    info!(
        queries = search_strings.len(),
        dir = ?output_dir,
        concurrency = max_concurrent,
        "Starting PubMed scrape"
    );

    let mut results: Vec<(usize, FetchReport)> = stream::iter(search_strings.iter().enumerate())
        .map(|(idx, s)| async move {
            let path = record_path(output_dir, &s.id);
            match fetcher.fetch(&s.id, &s.expression, &path).await {
                Ok(report) => Some((idx, report)),
                Err(e) => {
                    warn!(query = %s.id, error = %e, "An error occurred while scraping PubMed");
                    None
                }
            }
        })
        .buffer_unordered(max_concurrent.max(1))
        .filter_map(|r| async { r })
        .collect()
        .await;
    results.sort_by_key(|(idx, _)| *idx);

    let reports: Vec<FetchReport> = results.into_iter().map(|(_, r)| r).collect();
    let truncated = reports.iter().filter(|r| r.truncated).count();
    if truncated > 0 {
        warn!(
            truncated = truncated,
            "Some queries exceeded the per-query record ceiling, use a smaller increment"
        );
    }
    info!(
        fetched = reports.len(),
        failed = search_strings.len() - reports.len(),
        records = reports.iter().map(|r| r.written).sum::<usize>(),
        "Done"
    );
    Ok(reports)
}

/// E-utilities client with concurrency control and backoff
pub struct PubMedClient {
    client: reqwest::Client,
    config: FetchConfig,
    semaphore: Arc<Semaphore>,
}

impl PubMedClient {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("{}/{}", TOOL_NAME, env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PubmetaError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            config,
        })
    }

    /// Run esearch, returning the total hit count and the first page of ids
    pub async fn search(&self, expression: &str) -> Result<(usize, Vec<String>)> {
        let retmax = self.config.max_records.min(MAX_RECORDS_PER_QUERY).to_string();
        let url = self.build_url(
            "esearch.fcgi",
            &[("term", expression), ("retmax", retmax.as_str())],
        )?;
        let body = self.get_with_backoff(&url).await?;
        parse_esearch(&body)
    }

    /// Run esummary over `ids` in batches
    pub async fn summaries(&self, ids: &[String]) -> Result<Vec<Record>> {
        let mut records = Vec::with_capacity(ids.len());
        for batch in ids.chunks(SUMMARY_BATCH_SIZE) {
            let joined = batch.join(",");
            let url = self.build_url("esummary.fcgi", &[("id", joined.as_str())])?;
            let body = self.get_with_backoff(&url).await?;
            records.extend(parse_esummary(&body)?);
        }
        Ok(records)
    }

    fn build_url(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Url> {
        let mut url = Url::parse(&format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint
        ))
        .map_err(|e| PubmetaError::Config(format!("Invalid base URL: {}", e)))?;

        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("db", "pubmed");
            pairs.append_pair("retmode", "json");
            pairs.append_pair("tool", TOOL_NAME);
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
            if let Some(email) = &self.config.email {
                pairs.append_pair("email", email);
            }
            if let Some(key) = &self.config.api_key {
                pairs.append_pair("api_key", key);
            }
        }

        Ok(url)
    }

    async fn get_with_backoff(&self, url: &Url) -> Result<String> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| PubmetaError::Config(format!("Request limiter closed: {}", e)))?;

        let mut retries = 0;
        loop {
            let response = self.client.get(url.as_str()).send().await?;
            let status = response.status();

            if status.is_success() {
                return response.text().await.map_err(PubmetaError::Network);
            }

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if retries < self.config.max_retries {
                    let jitter = rand::random::<u64>() % 500;
                    let backoff = Duration::from_secs(2u64.pow(retries)) + Duration::from_millis(jitter);
                    warn!(
                        retries = retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    retries += 1;
                    continue;
                }
                return Err(PubmetaError::RateLimited(60));
            }

            return Err(PubmetaError::Api {
                code: status.as_u16() as i32,
                message: format!("E-utilities error: {}", status),
            });
        }
    }
}

impl RecordFetcher for PubMedClient {
    async fn fetch(&self, query_id: &str, expression: &str, output: &Path) -> Result<FetchReport> {
        debug!(query = query_id, expression = expression, "Searching PubMed");
        let (total_hits, ids) = self.search(expression).await?;
        let records = self.summaries(&ids).await?;

        let table = RecordTable::new(records);
        let file = std::fs::File::create(output)?;
        table.write_jsonl(file)?;

        let truncated = total_hits > ids.len();
        if truncated {
            warn!(
                query = query_id,
                total_hits = total_hits,
                fetched = ids.len(),
                "Result set truncated at the per-query ceiling"
            );
        }
        info!(query = query_id, written = table.len(), path = ?output, "Saved records");

        Ok(FetchReport {
            query_id: query_id.to_string(),
            path: output.to_path_buf(),
            total_hits,
            written: table.len(),
            truncated,
        })
    }
}

// === E-utilities Response Types ===

#[derive(Debug, Deserialize)]
struct ESearchResponse {
    esearchresult: ESearchResult,
}

#[derive(Debug, Deserialize)]
struct ESearchResult {
    #[serde(default)]
    count: String,
    #[serde(default)]
    idlist: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ESummaryResponse {
    result: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ESummaryDoc {
    #[serde(default)]
    uid: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    pubdate: String,
    #[serde(default)]
    sortpubdate: String,
    #[serde(default)]
    fulljournalname: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    authors: Vec<ESummaryAuthor>,
    #[serde(default)]
    articleids: Vec<ESummaryArticleId>,
}

#[derive(Debug, Default, Deserialize)]
struct ESummaryAuthor {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ESummaryArticleId {
    #[serde(default)]
    idtype: String,
    #[serde(default)]
    value: String,
}

fn parse_esearch(body: &str) -> Result<(usize, Vec<String>)> {
    let response: ESearchResponse = serde_json::from_str(body)
        .map_err(|e| PubmetaError::Parse(format!("Failed to parse esearch response: {}", e)))?;
    let result = response.esearchresult;
    let count = result
        .count
        .parse::<usize>()
        .ok()
        .ok_or_parse("esearch response without a hit count")?;
    Ok((count, result.idlist))
}

fn parse_esummary(body: &str) -> Result<Vec<Record>> {
    let response: ESummaryResponse = serde_json::from_str(body)
        .map_err(|e| PubmetaError::Parse(format!("Failed to parse esummary response: {}", e)))?;
    let mut result = response.result;

    let uids: Vec<String> = result
        .remove("uids")
        .and_then(|v| serde_json::from_value(v).ok())
        .ok_or_parse("esummary response without uids")?;

    let mut records = Vec::with_capacity(uids.len());
    for uid in uids {
        let Some(value) = result.remove(&uid) else {
            continue;
        };
        let doc: ESummaryDoc = serde_json::from_value(value)?;
        records.push(summary_to_record(doc));
    }
    Ok(records)
}

fn summary_to_record(doc: ESummaryDoc) -> Record {
    let non_empty = |s: String| (!s.trim().is_empty()).then_some(s);

    // "2020/03/15 00:00" sorts and parses; free-form pubdate is the fallback
    let date = doc
        .sortpubdate
        .get(..10)
        .map(|d| d.replace('/', "-"))
        .or_else(|| non_empty(doc.pubdate));

    let doi = doc
        .articleids
        .into_iter()
        .find(|id| id.idtype == "doi")
        .map(|id| id.value)
        .and_then(non_empty);

    let journal = non_empty(doc.fulljournalname).or_else(|| non_empty(doc.source));

    let mut extra = Map::new();
    extra.insert("pubmed_id".to_string(), Value::String(doc.uid));
    extra.insert(
        "authors".to_string(),
        Value::Array(doc.authors.into_iter().map(|a| Value::String(a.name)).collect()),
    );

    Record {
        title: non_empty(doc.title),
        abstract_text: None,
        doi,
        journal,
        date,
        year: None,
        query: None,
        extra,
    }
}
