//! Two-phase propagation of a document's records
//!
//! The relational store is the system of record, so it is written first; the
//! search index is a derived view and is only written once the upsert
//! committed. Each phase has its own retry budget and reconnects before every
//! attempt. The caller records the archive in the ledger only when
//! [`DualSinkWriter::propagate`] returns `Ok`.

use chrono::Utc;
use pubmed_common::types::Record;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::search::{BulkStats, SearchDocument, SearchIndex};
use super::storage::ArticleStore;
use super::{IngestError, Result};
use crate::ingest::common::{RetryPolicy, Sleeper};

/// Outcome of a successful propagation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropagationReport {
    pub records: usize,
    pub rows_affected: u64,
    pub indexed: BulkStats,
    pub chunks: usize,
}

/// Outcome of rebuilding the index from the article store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub pages: usize,
    pub indexed: BulkStats,
    pub chunks: usize,
}

/// Writes record batches to the article store, then the search index
pub struct DualSinkWriter {
    store: Arc<dyn ArticleStore>,
    index: Arc<dyn SearchIndex>,
    policy: RetryPolicy,
    chunk_size: usize,
    sleeper: Arc<dyn Sleeper>,
}

impl DualSinkWriter {
    pub fn new(
        store: Arc<dyn ArticleStore>,
        index: Arc<dyn SearchIndex>,
        policy: RetryPolicy,
        chunk_size: usize,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            store,
            index,
            policy,
            chunk_size: chunk_size.max(1),
            sleeper,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn sleeper(&self) -> &dyn Sleeper {
        self.sleeper.as_ref()
    }

    /// Write `records` to both sinks
    ///
    /// Fails without touching the index if the relational phase fails. A
    /// partial bulk failure aborts the search phase immediately and is not
    /// retried.
    pub async fn propagate(&self, records: &[Record]) -> Result<PropagationReport> {
        let rows_affected = self.write_relational(records).await?;
        let (indexed, chunks) = self.write_search(records).await?;

        Ok(PropagationReport {
            records: records.len(),
            rows_affected,
            indexed,
            chunks,
        })
    }

    async fn write_relational(&self, records: &[Record]) -> Result<u64> {
        let store = self.store.as_ref();
        let rows = self
            .policy
            .run_if(
                self.sleeper.as_ref(),
                "relational upsert",
                |_attempt| async move {
                    store.ensure_connected().await?;
                    store.upsert_articles(records).await
                },
                IngestError::is_transient,
            )
            .await?;

        info!(records = records.len(), rows_affected = rows, "Relational phase complete");
        Ok(rows)
    }

    async fn write_search(&self, records: &[Record]) -> Result<(BulkStats, usize)> {
        let now = Utc::now();
        let documents = records
            .iter()
            .map(|r| SearchDocument::from_record(r, now))
            .collect::<Result<Vec<_>>>()?;

        let index = self.index.as_ref();
        let chunk_size = self.chunk_size;
        let documents = documents.as_slice();

        let (stats, chunks) = self
            .policy
            .run_if(
                self.sleeper.as_ref(),
                "search bulk index",
                |_attempt| async move {
                    index.ensure_connected().await?;
                    index_in_chunks(index, documents, chunk_size).await
                },
                IngestError::is_transient,
            )
            .await?;

        info!(
            documents = documents.len(),
            chunks,
            successful = stats.successful,
            "Search phase complete"
        );
        Ok((stats, chunks))
    }

    /// Refresh the search index so new documents become searchable
    pub async fn refresh_index(&self) -> Result<()> {
        self.index.ensure_connected().await?;
        self.index.refresh().await
    }

    /// Re-index every stored article, paging through the store in PMID order
    ///
    /// Stops at the first page with failed documents.
    pub async fn rebuild_index(&self, page_size: usize) -> Result<RebuildReport> {
        let page_size = page_size.max(1);
        let mut report = RebuildReport::default();
        let mut after = String::new();

        self.index.ensure_connected().await?;
        loop {
            let page = self.store.articles_after(&after, page_size).await?;
            let Some(last) = page.last() else {
                break;
            };
            after = last.pubmed_id.clone();

            let now = Utc::now();
            let documents = page
                .iter()
                .map(|r| SearchDocument::from_record(r, now))
                .collect::<Result<Vec<_>>>()?;
            let (stats, chunks) = index_in_chunks(self.index.as_ref(), &documents, self.chunk_size).await?;

            report.pages += 1;
            report.chunks += chunks;
            report.indexed.merge(stats);
            info!(page = report.pages, last_pmid = %after, indexed = report.indexed.successful, "Re-indexed page");

            if page.len() < page_size {
                break;
            }
        }

        if let Err(e) = self.index.refresh().await {
            warn!(error = %e, "Search index refresh failed");
        }
        Ok(report)
    }
}

/// Submit `documents` in chunks of `chunk_size`, stopping at the first chunk
/// with failed items
pub async fn index_in_chunks(
    index: &dyn SearchIndex,
    documents: &[SearchDocument],
    chunk_size: usize,
) -> Result<(BulkStats, usize)> {
    let mut total = BulkStats::default();
    let mut chunks = 0;

    for chunk in documents.chunks(chunk_size.max(1)) {
        let stats = index.bulk_index(chunk).await?;
        total.merge(stats);
        chunks += 1;

        if stats.failed > 0 {
            error!(
                chunk = chunks,
                successful = total.successful,
                failed = total.failed,
                "Bulk indexing reported failed documents"
            );
            return Err(IngestError::PartialBulkFailure {
                successful: total.successful,
                failed: total.failed,
            });
        }
    }

    Ok((total, chunks))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct ChunkRecorder {
        sizes: Mutex<Vec<usize>>,
        fail_ids: Vec<String>,
    }

    #[async_trait]
    impl SearchIndex for ChunkRecorder {
        async fn ensure_connected(&self) -> Result<()> {
            Ok(())
        }

        async fn bulk_index(&self, documents: &[SearchDocument]) -> Result<BulkStats> {
            self.sizes.lock().unwrap().push(documents.len());
            let failed = documents.iter().filter(|d| self.fail_ids.contains(&d.id)).count();
            Ok(BulkStats {
                successful: documents.len() - failed,
                failed,
            })
        }

        async fn refresh(&self) -> Result<()> {
            Ok(())
        }
    }

    struct NoSleep;

    #[async_trait]
    impl Sleeper for NoSleep {
        async fn sleep(&self, _duration: Duration) {}
    }

    fn documents(n: usize) -> Vec<SearchDocument> {
        let date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        (0..n)
            .map(|i| SearchDocument::from_record(&Record::new(i.to_string(), "t", date), Utc::now()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_chunk_count_is_ceiling_of_batch_over_size() {
        let index = ChunkRecorder::default();
        let docs = documents(7);

        let (stats, chunks) = index_in_chunks(&index, &docs, 3).await.unwrap();

        assert_eq!(chunks, 3);
        assert_eq!(*index.sizes.lock().unwrap(), vec![3, 3, 1]);
        assert_eq!(stats.total(), 7);
    }

    #[tokio::test]
    async fn test_failed_chunk_stops_indexing() {
        let index = ChunkRecorder {
            fail_ids: vec!["1".to_string()],
            ..Default::default()
        };
        let docs = documents(6);

        let result = index_in_chunks(&index, &docs, 2).await;

        assert!(matches!(
            result,
            Err(IngestError::PartialBulkFailure { successful: 1, failed: 1 })
        ));
        assert_eq!(index.sizes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_partial_failure_is_not_retried() {
        struct NullStore;

        #[async_trait]
        impl ArticleStore for NullStore {
            async fn ensure_connected(&self) -> Result<()> {
                Ok(())
            }
            async fn upsert_articles(&self, records: &[Record]) -> Result<u64> {
                Ok(records.len() as u64)
            }
            async fn articles_after(&self, _after: &str, _limit: usize) -> Result<Vec<Record>> {
                Ok(Vec::new())
            }
        }

        let index = Arc::new(ChunkRecorder {
            fail_ids: vec!["0".to_string()],
            ..Default::default()
        });
        let writer = DualSinkWriter::new(
            Arc::new(NullStore),
            index.clone(),
            RetryPolicy::linear(2, Duration::from_secs(60)),
            15_000,
            Arc::new(NoSleep),
        );
        let date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();

        let result = writer.propagate(&[Record::new("0", "t", date)]).await;

        assert!(matches!(result, Err(IngestError::PartialBulkFailure { .. })));
        assert_eq!(index.sizes.lock().unwrap().len(), 1);
    }
}
