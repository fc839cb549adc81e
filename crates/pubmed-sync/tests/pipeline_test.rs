//! Dual-sink propagation against in-memory sinks

mod helpers;

use chrono::NaiveDate;
use helpers::{MemoryIndex, MemoryStore, RecordingSleeper};
use pubmed_common::types::Record;
use pubmed_sync::ingest::common::RetryPolicy;
use pubmed_sync::ingest::pubmed::parser::parse_document_bytes;
use pubmed_sync::ingest::pubmed::{DualSinkWriter, IngestError};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const TWO_ARTICLES: &[u8] = br#"<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation>
      <PMID>900</PMID>
      <Article>
        <Journal><Title>Cell</Title></Journal>
        <ArticleTitle>Original title</ArticleTitle>
        <AuthorList><Author><LastName>Doe</LastName><ForeName>Jane</ForeName></Author></AuthorList>
      </Article>
    </MedlineCitation>
    <PubmedData>
      <History><PubMedPubDate PubStatus="pubmed"><Year>2018</Year><Month>6</Month><Day>1</Day></PubMedPubDate></History>
      <ArticleIdList><ArticleId IdType="doi">10.1016/j.cell.900</ArticleId></ArticleIdList>
    </PubmedData>
  </PubmedArticle>
  <PubmedArticle>
    <MedlineCitation><PMID>901</PMID><Article></Article></MedlineCitation>
    <PubmedData>
      <History><PubMedPubDate PubStatus="pubmed"><Year>2018</Year></PubMedPubDate></History>
    </PubmedData>
  </PubmedArticle>
</PubmedArticleSet>"#;

struct Harness {
    store: Arc<MemoryStore>,
    index: Arc<MemoryIndex>,
    sleeper: Arc<RecordingSleeper>,
    writer: DualSinkWriter,
}

fn harness(store: MemoryStore, index: MemoryIndex, chunk_size: usize) -> Harness {
    let store = Arc::new(store);
    let index = Arc::new(index);
    let sleeper = Arc::new(RecordingSleeper::default());
    let writer = DualSinkWriter::new(
        store.clone(),
        index.clone(),
        RetryPolicy::linear(2, Duration::from_secs(60)),
        chunk_size,
        sleeper.clone(),
    );
    Harness {
        store,
        index,
        sleeper,
        writer,
    }
}

fn records(n: usize) -> Vec<Record> {
    let date = NaiveDate::from_ymd_opt(2019, 3, 4).unwrap();
    (0..n)
        .map(|i| Record::new(format!("{}", i + 1), format!("Title {}", i), date))
        .collect()
}

#[tokio::test]
async fn test_end_to_end_upsert_is_idempotent() {
    let h = harness(MemoryStore::default(), MemoryIndex::default(), 15_000);

    let parsed: Vec<Record> = parse_document_bytes(TWO_ARTICLES)
        .unwrap()
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(parsed.len(), 1);

    h.writer.propagate(&parsed).await.unwrap();
    assert_eq!(h.store.len(), 1);
    assert_eq!(h.index.len(), 1);
    assert_eq!(h.store.row("900").unwrap().title, "Original title");

    let mut updated = parsed[0].clone();
    updated.title = "Corrected title".to_string();
    h.writer.propagate(&[updated]).await.unwrap();

    assert_eq!(h.store.len(), 1);
    assert_eq!(h.index.len(), 1);
    assert_eq!(h.store.row("900").unwrap().title, "Corrected title");
    let doc = h.index.doc("900").unwrap();
    assert_eq!(doc.source["title"], "Corrected title");
    assert_eq!(doc.source["pub_date"], "2018-06-01");
    assert_eq!(doc.source["doi"], "10.1016/j.cell.900");
    assert!(doc.source.contains_key("@timestamp"));
    assert!(h.sleeper.sleeps().is_empty());
}

#[tokio::test]
async fn test_search_batch_is_split_into_fixed_chunks() {
    let h = harness(MemoryStore::default(), MemoryIndex::default(), 15_000);
    let batch = records(30_001);

    let report = h.writer.propagate(&batch).await.unwrap();

    assert_eq!(report.chunks, 3);
    assert_eq!(*h.index.chunk_sizes.lock().unwrap(), vec![15_000, 15_000, 1]);
    assert_eq!(report.indexed.successful + report.indexed.failed, 30_001);
    assert_eq!(report.records, 30_001);
}

#[tokio::test]
async fn test_transient_store_failure_is_retried_with_linear_backoff() {
    let h = harness(MemoryStore::failing(1), MemoryIndex::default(), 15_000);

    h.writer.propagate(&records(3)).await.unwrap();

    assert_eq!(h.store.len(), 3);
    assert_eq!(h.store.connects.load(Ordering::SeqCst), 2);
    assert_eq!(h.sleeper.sleeps(), vec![Duration::from_secs(60)]);
}

#[tokio::test]
async fn test_exhausted_store_retries_never_reach_the_index() {
    let h = harness(MemoryStore::failing(5), MemoryIndex::default(), 15_000);

    let result = h.writer.propagate(&records(3)).await;

    assert!(matches!(result, Err(IngestError::Io(_))));
    assert_eq!(h.store.upserts.load(Ordering::SeqCst), 2);
    assert!(h.index.chunk_sizes.lock().unwrap().is_empty());
    assert_eq!(h.sleeper.sleeps(), vec![Duration::from_secs(60)]);
}

#[tokio::test]
async fn test_partial_bulk_failure_fails_propagation() {
    let h = harness(MemoryStore::default(), MemoryIndex::rejecting(&["2"]), 2);

    let result = h.writer.propagate(&records(5)).await;

    match result {
        Err(IngestError::PartialBulkFailure { successful, failed }) => {
            assert_eq!(successful, 1);
            assert_eq!(failed, 1);
        },
        other => panic!("expected partial bulk failure, got {:?}", other),
    }
    // Relational phase already committed; later chunks were not sent
    assert_eq!(h.store.len(), 5);
    assert_eq!(*h.index.chunk_sizes.lock().unwrap(), vec![2]);
    assert!(h.sleeper.sleeps().is_empty());
}

fn seed(store: &MemoryStore, batch: &[Record]) {
    let mut rows = store.rows.lock().unwrap();
    for record in batch {
        rows.insert(record.pubmed_id.clone(), record.clone());
    }
}

#[tokio::test]
async fn test_rebuild_pages_through_every_stored_article() {
    let h = harness(MemoryStore::default(), MemoryIndex::default(), 2);
    seed(&h.store, &records(5));

    let report = h.writer.rebuild_index(2).await.unwrap();

    assert_eq!(report.pages, 3);
    assert_eq!(report.chunks, 3);
    assert_eq!(report.indexed.successful, 5);
    assert_eq!(h.index.len(), 5);
    assert_eq!(h.index.doc("5").unwrap().source["title"], "Title 4");
    assert_eq!(h.index.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rebuild_of_empty_store_indexes_nothing() {
    let h = harness(MemoryStore::default(), MemoryIndex::default(), 15_000);

    let report = h.writer.rebuild_index(100).await.unwrap();

    assert_eq!(report.pages, 0);
    assert!(h.index.chunk_sizes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_rebuild_stops_at_first_failed_page() {
    let h = harness(MemoryStore::default(), MemoryIndex::rejecting(&["2"]), 15_000);
    seed(&h.store, &records(4));

    let result = h.writer.rebuild_index(2).await;

    assert!(matches!(
        result,
        Err(IngestError::PartialBulkFailure { successful: 1, failed: 1 })
    ));
    assert_eq!(h.index.chunk_sizes.lock().unwrap().len(), 1);
}
