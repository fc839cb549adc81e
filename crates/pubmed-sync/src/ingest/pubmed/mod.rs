// PubMed Ingestion Module
//
// Mirrors the NCBI PubMed baseline and update-file corpora into two sinks:
// a MySQL articles table (system of record) and an Elasticsearch index
// (derived, rebuildable view).
//
// Layout:
// - mirror: HTML directory listing discovery + streamed archive download
// - xml / parser: streaming article reader and record normalization
// - storage / ledger: relational upsert and the ingested-archive ledger
// - search: bulk indexing and refresh
// - pipeline: two-phase propagation of one document's records
// - state_machine: the unattended control loop
//
// Data sources:
// - Baseline: https://ftp.ncbi.nlm.nih.gov/pubmed/baseline/ (~1,200 files)
// - Updates:  https://ftp.ncbi.nlm.nih.gov/pubmed/updatefiles/ (daily)

pub mod config;
pub mod ledger;
pub mod mirror;
pub mod parser;
pub mod pipeline;
pub mod search;
pub mod state_machine;
pub mod storage;
pub mod xml;

pub use config::PubmedConfig;
pub use ledger::{IngestionLedger, MySqlLedger};
pub use mirror::{ArchiveSource, PubmedMirror, RemoteArchive};
pub use parser::{parse_article, parse_document_file, ParseStats};
pub use pipeline::{DualSinkWriter, RebuildReport};
pub use search::{BulkStats, ElasticIndex, SearchDocument, SearchIndex};
pub use state_machine::{IngestionStateMachine, LocalView, State, Step};
pub use storage::{ArticleStore, MySqlArticleStore};

use pubmed_common::CommonError;

/// Compressed archive extension
pub const ARCHIVE_EXTENSION: &str = ".gz";

/// Decompressed document extension
pub const DOCUMENT_EXTENSION: &str = ".xml";

/// Suffix of files still being written
pub const PARTIAL_EXTENSION: &str = ".part";

/// Result type for PubMed ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Error types for PubMed ingestion
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Directory listing error: {0}")]
    Listing(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Search index returned {status}: {body}")]
    Search { status: u16, body: String },

    #[error("Bulk indexing partially failed: {successful} succeeded, {failed} failed")]
    PartialBulkFailure { successful: usize, failed: usize },

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Configuration error: {0}")]
    Common(#[from] CommonError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<quick_xml::Error> for IngestError {
    fn from(err: quick_xml::Error) -> Self {
        IngestError::Xml(err.to_string())
    }
}

impl IngestError {
    /// Whether retrying the same call could plausibly succeed
    ///
    /// Malformed input and partial bulk failures are deterministic for a
    /// given batch, so they are never retried.
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Http(_)
            | IngestError::Io(_)
            | IngestError::Database(_)
            | IngestError::Decompression(_)
            | IngestError::Task(_) => true,
            IngestError::HttpStatus { status, .. } | IngestError::Search { status, .. } => {
                *status == 429 || *status >= 500
            },
            IngestError::Migration(_)
            | IngestError::Xml(_)
            | IngestError::Listing(_)
            | IngestError::Json(_)
            | IngestError::PartialBulkFailure { .. }
            | IngestError::Common(_) => false,
        }
    }
}

/// Archive name a decompressed document was produced from
///
/// `pubmed25n0001.xml` -> `pubmed25n0001.xml.gz`. This is the unit recorded
/// in the ledger and checked by discovery.
pub fn archive_name_for_document(document: &str) -> String {
    format!("{}{}", document, ARCHIVE_EXTENSION)
}

/// Document name an archive decompresses to
pub fn document_name_for_archive(archive: &str) -> String {
    archive
        .strip_suffix(ARCHIVE_EXTENSION)
        .unwrap_or(archive)
        .to_string()
}
