//! Search sink: bulk indexing over the Elasticsearch REST API
//!
//! Documents are keyed by PMID, so re-indexing an article overwrites it.
//! Requests are plain NDJSON `_bulk` calls made with reqwest; the response is
//! tallied per item and failed items are logged with their error body.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use pubmed_common::types::{normalize_calendar_date, Record};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::config::SearchConfig;
use super::{IngestError, Result};

/// Success/failure tally of bulk operations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkStats {
    pub successful: usize,
    pub failed: usize,
}

impl BulkStats {
    pub fn total(&self) -> usize {
        self.successful + self.failed
    }

    pub fn merge(&mut self, other: BulkStats) {
        self.successful += other.successful;
        self.failed += other.failed;
    }
}

/// One failed bulk item
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItemFailure {
    pub id: String,
    pub status: u16,
    pub error: Value,
}

/// One document ready for the index
#[derive(Debug, Clone, PartialEq)]
pub struct SearchDocument {
    pub id: String,
    pub source: Map<String, Value>,
}

impl SearchDocument {
    /// Copy every record field and stamp creation/update times
    ///
    /// `pub_date` is re-validated through the calendar date rule; a value
    /// that does not survive becomes null.
    pub fn from_record(record: &Record, now: DateTime<Utc>) -> Result<Self> {
        let mut source = match serde_json::to_value(record)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        let stamp = now.to_rfc3339_opts(SecondsFormat::Micros, true);
        source.insert("@timestamp".to_string(), Value::String(stamp.clone()));
        source.insert("@last_update".to_string(), Value::String(stamp));
        source.insert(
            "pub_date".to_string(),
            normalize_calendar_date(&record.pub_date_string())
                .map(Value::String)
                .unwrap_or(Value::Null),
        );

        Ok(Self {
            id: record.pubmed_id.clone(),
            source,
        })
    }
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Verify (and if needed re-establish) the connection; idempotent
    async fn ensure_connected(&self) -> Result<()>;

    /// Index one chunk, returning the per-item tally
    async fn bulk_index(&self, documents: &[SearchDocument]) -> Result<BulkStats>;

    /// Make recent writes visible to search
    async fn refresh(&self) -> Result<()>;
}

/// NDJSON `_bulk` body: an `index` action line, then the source, per document
pub fn bulk_body(index: &str, documents: &[SearchDocument]) -> Result<String> {
    let mut body = String::new();
    for doc in documents {
        let action = json!({ "index": { "_index": index, "_id": doc.id } });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&doc.source)?);
        body.push('\n');
    }
    Ok(body)
}

/// Tally a `_bulk` response for a request of `expected` documents
///
/// Any 2xx item status counts as a success. Documents the response has no
/// item for are counted as failed.
pub fn tally_bulk_response(response: &Value, expected: usize) -> (BulkStats, Vec<BulkItemFailure>) {
    let mut stats = BulkStats::default();
    let mut failures = Vec::new();

    let items = response
        .get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for item in items {
        // Each item is keyed by its action name
        let Some(result) = item.as_object().and_then(|o| o.values().next()) else {
            stats.failed += 1;
            continue;
        };
        let status = result.get("status").and_then(Value::as_u64).unwrap_or(0) as u16;

        if (200..300).contains(&status) {
            stats.successful += 1;
        } else {
            stats.failed += 1;
            failures.push(BulkItemFailure {
                id: result
                    .get("_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                status,
                error: result.get("error").cloned().unwrap_or(Value::Null),
            });
        }
    }

    stats.failed += expected.saturating_sub(stats.total());
    (stats, failures)
}

/// Elasticsearch-backed [`SearchIndex`]
pub struct ElasticIndex {
    base_url: String,
    index: String,
    api_key: Option<String>,
    basic_auth: Option<(String, Option<String>)>,
    client: Client,
}

impl ElasticIndex {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            api_key: config.api_key.clone(),
            basic_auth: config
                .username
                .clone()
                .map(|user| (user, config.password.clone())),
            client,
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match (&self.api_key, &self.basic_auth) {
            (Some(key), _) => request.header("Authorization", format!("ApiKey {}", key)),
            (None, Some((user, password))) => request.basic_auth(user, password.as_ref()),
            (None, None) => request,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(IngestError::Search {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl SearchIndex for ElasticIndex {
    /// `HEAD /<index>`; a missing index still proves the cluster answers
    /// with these credentials
    async fn ensure_connected(&self) -> Result<()> {
        let url = format!("{}/{}", self.base_url, self.index);
        let response = self.authorize(self.client.head(url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(index = %self.index, "Index does not exist yet");
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }

    async fn bulk_index(&self, documents: &[SearchDocument]) -> Result<BulkStats> {
        if documents.is_empty() {
            return Ok(BulkStats::default());
        }

        let body = bulk_body(&self.index, documents)?;
        let request = self
            .authorize(self.client.post(format!("{}/_bulk", self.base_url)))
            .header("Content-Type", "application/x-ndjson")
            .body(body);

        let response = Self::check(request.send().await?).await?;
        let payload: Value = response.json().await?;
        let (stats, failures) = tally_bulk_response(&payload, documents.len());

        let flagged = payload.get("errors").and_then(Value::as_bool).unwrap_or(false);
        if flagged && stats.failed == 0 {
            return Err(IngestError::Search {
                status: 200,
                body: "bulk response flagged errors without a failed item".to_string(),
            });
        }
        if stats.total() > documents.len() {
            warn!(
                index = %self.index,
                sent = documents.len(),
                items = stats.total(),
                "Bulk response has more items than documents sent"
            );
        }
        if stats.failed > failures.len() {
            error!(
                index = %self.index,
                unaccounted = stats.failed - failures.len(),
                "Bulk response has missing or malformed items"
            );
        }

        for failure in &failures {
            error!(
                index = %self.index,
                id = %failure.id,
                status = failure.status,
                error = %failure.error,
                "Document failed to index"
            );
        }

        debug!(
            index = %self.index,
            successful = stats.successful,
            failed = stats.failed,
            "Bulk request completed"
        );
        Ok(stats)
    }

    async fn refresh(&self) -> Result<()> {
        let url = format!("{}/{}/_refresh", self.base_url, self.index);
        let request = self.authorize(self.client.post(url));
        Self::check(request.send().await?).await?;

        info!(index = %self.index, "Refreshed search index");
        Ok(())
    }
}
