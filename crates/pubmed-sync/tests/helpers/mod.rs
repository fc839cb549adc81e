//! In-memory collaborators for integration tests
//!
//! Every seam of the ingestion loop has a fake here:
//! - `MemoryStore` / `MemoryIndex`: keyed upsert semantics, injectable failures
//! - `MemoryLedger`: a set of archive names
//! - `StaticSource`: fixed discovery result, downloads from in-memory payloads
//! - `RecordingSleeper`: records requested sleeps instead of sleeping

#![allow(dead_code)]

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use pubmed_common::types::Record;
use pubmed_sync::ingest::common::Sleeper;
use pubmed_sync::ingest::pubmed::{
    ArchiveSource, BulkStats, IngestError, IngestionLedger, RemoteArchive, SearchDocument,
    SearchIndex,
};
use pubmed_sync::ingest::pubmed::{ArticleStore, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

fn unavailable(what: &str) -> IngestError {
    IngestError::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        format!("{} unavailable", what),
    ))
}

// ============================================================================
// Sinks
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    pub rows: Mutex<BTreeMap<String, Record>>,
    /// Number of upcoming upserts that fail with a transient error
    pub failures_left: AtomicU32,
    pub connects: AtomicUsize,
    pub upserts: AtomicUsize,
}

impl MemoryStore {
    pub fn failing(times: u32) -> Self {
        let store = Self::default();
        store.failures_left.store(times, Ordering::SeqCst);
        store
    }

    pub fn row(&self, pubmed_id: &str) -> Option<Record> {
        self.rows.lock().unwrap().get(pubmed_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn ensure_connected(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert_articles(&self, records: &[Record]) -> Result<u64> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(unavailable("database"));
        }

        let mut rows = self.rows.lock().unwrap();
        for record in records {
            rows.insert(record.pubmed_id.clone(), record.clone());
        }
        Ok(records.len() as u64)
    }

    async fn articles_after(&self, after: &str, limit: usize) -> Result<Vec<Record>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .range::<str, _>((Bound::Excluded(after), Bound::Unbounded))
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryIndex {
    pub docs: Mutex<HashMap<String, SearchDocument>>,
    pub chunk_sizes: Mutex<Vec<usize>>,
    /// Document ids rejected by every bulk call
    pub reject_ids: Mutex<HashSet<String>>,
    pub refreshes: AtomicUsize,
    pub refresh_fails: bool,
}

impl MemoryIndex {
    pub fn rejecting(ids: &[&str]) -> Self {
        let index = Self::default();
        *index.reject_ids.lock().unwrap() = ids.iter().map(|s| s.to_string()).collect();
        index
    }

    pub fn doc(&self, id: &str) -> Option<SearchDocument> {
        self.docs.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.docs.lock().unwrap().len()
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn ensure_connected(&self) -> Result<()> {
        Ok(())
    }

    async fn bulk_index(&self, documents: &[SearchDocument]) -> Result<BulkStats> {
        self.chunk_sizes.lock().unwrap().push(documents.len());
        let reject = self.reject_ids.lock().unwrap().clone();
        let mut docs = self.docs.lock().unwrap();
        let mut stats = BulkStats::default();

        for doc in documents {
            if reject.contains(&doc.id) {
                stats.failed += 1;
            } else {
                docs.insert(doc.id.clone(), doc.clone());
                stats.successful += 1;
            }
        }
        Ok(stats)
    }

    async fn refresh(&self) -> Result<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.refresh_fails {
            return Err(unavailable("search"));
        }
        Ok(())
    }
}

// ============================================================================
// Ledger
// ============================================================================

#[derive(Default)]
pub struct MemoryLedger {
    pub names: Mutex<HashSet<String>>,
}

impl MemoryLedger {
    pub fn with(names: &[&str]) -> Self {
        Self {
            names: Mutex::new(names.iter().map(|n| n.to_string()).collect()),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.lock().unwrap().contains(name)
    }
}

#[async_trait]
impl IngestionLedger for MemoryLedger {
    async fn record_ingested_batch(&self, file_names: &[String]) -> Result<()> {
        self.names.lock().unwrap().extend(file_names.iter().cloned());
        Ok(())
    }

    async fn list_ingested(&self) -> Result<HashSet<String>> {
        Ok(self.names.lock().unwrap().clone())
    }
}

// ============================================================================
// Archive source
// ============================================================================

#[derive(Default)]
pub struct StaticSource {
    pub archives: Vec<RemoteArchive>,
    /// Gzipped bodies served by `download`, by archive name
    pub payloads: HashMap<String, Vec<u8>>,
    pub discovery_fails: bool,
    pub downloads: Mutex<Vec<String>>,
}

impl StaticSource {
    pub fn listing(names: &[&str]) -> Self {
        Self {
            archives: names
                .iter()
                .map(|n| RemoteArchive::new("https://mirror.test/baseline/", *n))
                .collect(),
            ..Default::default()
        }
    }

    pub fn with_payload(mut self, name: &str, xml: &[u8]) -> Self {
        self.payloads.insert(name.to_string(), gzip(xml));
        self
    }
}

#[async_trait]
impl ArchiveSource for StaticSource {
    async fn discover(&self, seen: &HashSet<String>) -> Result<Vec<RemoteArchive>> {
        if self.discovery_fails {
            return Err(unavailable("mirror"));
        }
        Ok(self
            .archives
            .iter()
            .filter(|a| !seen.contains(&a.name))
            .cloned()
            .collect())
    }

    async fn download(&self, archive: &RemoteArchive, dir: &Path) -> Result<PathBuf> {
        self.downloads.lock().unwrap().push(archive.name.clone());
        let body = self
            .payloads
            .get(&archive.name)
            .cloned()
            .unwrap_or_else(|| gzip(b"<PubmedArticleSet/>"));
        let target = dir.join(&archive.name);
        std::fs::write(&target, body)?;
        Ok(target)
    }
}

// ============================================================================
// Sleeper
// ============================================================================

#[derive(Default)]
pub struct RecordingSleeper {
    pub slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}
