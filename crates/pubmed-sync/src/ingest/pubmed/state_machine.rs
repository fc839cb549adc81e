//! Unattended ingestion control loop
//!
//! Every iteration recomputes what to do from two observable sources: the
//! files in the data directory and the ingestion ledger. Nothing is carried
//! in memory between iterations, so a restart resumes where the previous
//! process stopped.
//!
//! Priority, highest first:
//!
//! | State            | Condition                                          |
//! |------------------|----------------------------------------------------|
//! | ProcessDocuments | a document whose archive is not in the ledger      |
//! | Decompress       | an archive not in the ledger without its document  |
//! | Clean            | any other archive, document or partial file        |
//! | Acquire          | discovery returns unseen archives (capped)         |
//! | Idle             | nothing to do                                      |

use pubmed_common::types::Record;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::config::PubmedConfig;
use super::ledger::IngestionLedger;
use super::mirror::{ArchiveSource, RemoteArchive};
use super::parser::parse_document_file;
use super::pipeline::DualSinkWriter;
use super::{
    archive_name_for_document, document_name_for_archive, IngestError, Result, ARCHIVE_EXTENSION,
    DOCUMENT_EXTENSION, PARTIAL_EXTENSION,
};
use crate::ingest::common::decompression::decompress_with_retry;
use crate::ingest::common::{RetryPolicy, Sleeper};

static SEQUENCE_NUMBER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"n(\d+)").ok());

/// Archive sequence number (`pubmed25n0042.xml.gz` -> 42), 0 when absent
pub fn sequence_number(name: &str) -> u64 {
    SEQUENCE_NUMBER
        .as_ref()
        .and_then(|re| re.captures(name))
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0)
}

/// Loop state, without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    ProcessDocuments,
    Decompress,
    Clean,
    Acquire,
    Idle,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::ProcessDocuments => "PROCESS_DOCUMENTS",
            State::Decompress => "DECOMPRESS",
            State::Clean => "CLEAN",
            State::Acquire => "ACQUIRE",
            State::Idle => "IDLE",
        };
        f.write_str(name)
    }
}

/// Next action with the data it acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    ProcessDocuments { documents: Vec<PathBuf> },
    Decompress { archives: Vec<PathBuf> },
    Clean { files: Vec<PathBuf> },
    Acquire { archives: Vec<RemoteArchive> },
    Idle { duration: Duration },
}

impl Step {
    pub fn state(&self) -> State {
        match self {
            Step::ProcessDocuments { .. } => State::ProcessDocuments,
            Step::Decompress { .. } => State::Decompress,
            Step::Clean { .. } => State::Clean,
            Step::Acquire { .. } => State::Acquire,
            Step::Idle { .. } => State::Idle,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::ProcessDocuments { documents } => {
                write!(f, "{} {:?}", self.state(), file_names(documents))
            },
            Step::Decompress { archives } => write!(f, "{} {:?}", self.state(), file_names(archives)),
            Step::Clean { files } => write!(f, "{} {:?}", self.state(), file_names(files)),
            Step::Acquire { archives } => {
                let names: Vec<&str> = archives.iter().map(|a| a.name.as_str()).collect();
                write!(f, "{} {:?}", self.state(), names)
            },
            Step::Idle { duration } => write!(f, "{} {}s", self.state(), duration.as_secs()),
        }
    }
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

fn file_names(paths: &[PathBuf]) -> Vec<&str> {
    paths.iter().map(|p| file_name(p)).collect()
}

/// Classified contents of the data directory, each list sorted by sequence
/// number
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalView {
    pub archives: Vec<PathBuf>,
    pub documents: Vec<PathBuf>,
    pub partials: Vec<PathBuf>,
}

impl LocalView {
    /// Scan `dir`; a missing directory is an empty view
    pub fn scan(dir: &Path) -> Result<Self> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                paths.push(entry.path());
            }
        }
        Ok(Self::from_paths(paths))
    }

    pub fn from_paths(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut view = Self::default();
        for path in paths {
            let name = file_name(&path);
            if name.ends_with(PARTIAL_EXTENSION) {
                view.partials.push(path);
            } else if name.ends_with(ARCHIVE_EXTENSION) {
                view.archives.push(path);
            } else if name.ends_with(DOCUMENT_EXTENSION) {
                view.documents.push(path);
            }
        }

        for list in [&mut view.archives, &mut view.documents, &mut view.partials] {
            list.sort_by(|a, b| {
                let (a, b) = (file_name(a), file_name(b));
                sequence_number(a).cmp(&sequence_number(b)).then_with(|| a.cmp(b))
            });
        }
        view
    }

    pub fn is_empty(&self) -> bool {
        self.archives.is_empty() && self.documents.is_empty() && self.partials.is_empty()
    }

    fn has_document(&self, name: &str) -> bool {
        self.documents.iter().any(|d| file_name(d) == name)
    }
}

/// Choose a local step, or `None` when the data directory needs nothing
pub fn evaluate_local(view: &LocalView, ingested: &HashSet<String>) -> Option<Step> {
    let pending_documents: Vec<PathBuf> = view
        .documents
        .iter()
        .filter(|d| !ingested.contains(&archive_name_for_document(file_name(d))))
        .cloned()
        .collect();
    if !pending_documents.is_empty() {
        return Some(Step::ProcessDocuments {
            documents: pending_documents,
        });
    }

    let pending_archives: Vec<PathBuf> = view
        .archives
        .iter()
        .filter(|a| {
            let name = file_name(a);
            !ingested.contains(name) && !view.has_document(&document_name_for_archive(name))
        })
        .cloned()
        .collect();
    if !pending_archives.is_empty() {
        return Some(Step::Decompress {
            archives: pending_archives,
        });
    }

    if !view.is_empty() {
        let files = view
            .archives
            .iter()
            .chain(&view.documents)
            .chain(&view.partials)
            .cloned()
            .collect();
        return Some(Step::Clean { files });
    }

    None
}

/// Acquire the first `cap` discovered archives, or idle
pub fn acquisition_step(mut discovered: Vec<RemoteArchive>, cap: usize, idle: Duration) -> Step {
    if discovered.is_empty() {
        return Step::Idle { duration: idle };
    }
    discovered.truncate(cap.max(1));
    Step::Acquire {
        archives: discovered,
    }
}

/// Orchestrates discovery, retrieval, parsing and propagation
pub struct IngestionStateMachine {
    data_dir: PathBuf,
    source: Arc<dyn ArchiveSource>,
    writer: DualSinkWriter,
    ledger: Arc<dyn IngestionLedger>,
    sleeper: Arc<dyn Sleeper>,
    acquire_cap: usize,
    idle: Duration,
    step_pause: Duration,
    decompress_policy: RetryPolicy,
}

impl IngestionStateMachine {
    pub fn new(
        config: &PubmedConfig,
        source: Arc<dyn ArchiveSource>,
        writer: DualSinkWriter,
        ledger: Arc<dyn IngestionLedger>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            source,
            writer,
            ledger,
            sleeper,
            acquire_cap: config.acquire_cap,
            idle: config.idle_interval(),
            step_pause: config.step_pause(),
            decompress_policy: config.decompress_policy(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Evaluate the next step from local files, the ledger and discovery
    pub async fn next_step(&self) -> Result<Step> {
        let view = LocalView::scan(&self.data_dir)?;
        let ingested = self.ledger.list_ingested().await?;

        if let Some(step) = evaluate_local(&view, &ingested) {
            return Ok(step);
        }

        match self.source.discover(&ingested).await {
            Ok(discovered) => Ok(acquisition_step(discovered, self.acquire_cap, self.idle)),
            Err(e) => {
                warn!(error = %e, "Discovery failed, idling");
                Ok(Step::Idle { duration: self.idle })
            },
        }
    }

    /// Evaluate and execute one step
    pub async fn run_once(&self) -> Result<State> {
        let step = self.next_step().await?;
        let state = step.state();
        info!(state = %state, step = %step, "Executing step");

        self.execute(step).await?;
        Ok(state)
    }

    /// Run forever; step failures are logged and the next iteration
    /// recomputes state
    pub async fn run_forever(&self) {
        info!(data_dir = %self.data_dir.display(), "Starting ingestion loop");
        loop {
            match self.run_once().await {
                Ok(State::Idle) => continue,
                Ok(state) => debug!(state = %state, "Step finished"),
                Err(e) => error!(error = %e, "Step failed"),
            }
            self.sleeper.sleep(self.step_pause).await;
        }
    }

    pub async fn execute(&self, step: Step) -> Result<()> {
        match step {
            Step::ProcessDocuments { documents } => self.process_documents(&documents).await,
            Step::Decompress { archives } => {
                self.decompress(&archives).await;
                Ok(())
            },
            Step::Clean { files } => {
                clean(&files).await;
                Ok(())
            },
            Step::Acquire { archives } => self.acquire(&archives).await,
            Step::Idle { duration } => {
                info!(seconds = duration.as_secs(), "Nothing to do, sleeping");
                self.sleeper.sleep(duration).await;
                Ok(())
            },
        }
    }

    /// Propagate each document in order, stopping at the first failure
    ///
    /// The index is refreshed afterwards either way.
    async fn process_documents(&self, documents: &[PathBuf]) -> Result<()> {
        let mut outcome = Ok(());
        for document in documents {
            if let Err(e) = self.process_document(document).await {
                error!(file = %file_name(document), error = %e, "Document left for a later cycle");
                outcome = Err(e);
                break;
            }
        }

        if let Err(e) = self.writer.refresh_index().await {
            warn!(error = %e, "Search index refresh failed");
        }
        outcome
    }

    async fn process_document(&self, document: &Path) -> Result<()> {
        let name = file_name(document).to_string();
        let path = document.to_path_buf();
        let (parsed, stats) = tokio::task::spawn_blocking(move || parse_document_file(&path)).await??;

        let records: Vec<Record> = parsed.into_iter().flatten().collect();
        let report = self.writer.propagate(&records).await?;
        info!(
            file = %name,
            records = report.records,
            skipped = stats.skipped,
            chunks = report.chunks,
            "Propagated document"
        );

        let archive = archive_name_for_document(&name);
        let ledger = self.ledger.as_ref();
        self.writer
            .policy()
            .run_if(
                self.writer.sleeper(),
                "ledger write",
                |_attempt| ledger.record_ingested(&archive),
                IngestError::is_transient,
            )
            .await?;

        match tokio::fs::remove_file(document).await {
            Ok(()) => debug!(file = %name, "Removed processed document"),
            Err(e) => warn!(file = %name, error = %e, "Failed to remove processed document"),
        }
        Ok(())
    }

    /// Failed archives stay on disk for a later cycle
    async fn decompress(&self, archives: &[PathBuf]) {
        for archive in archives {
            if let Err(e) =
                decompress_with_retry(archive, &self.decompress_policy, self.sleeper.as_ref()).await
            {
                error!(archive = %file_name(archive), error = %e, "Failed to unpack archive");
            }
        }
    }

    async fn acquire(&self, archives: &[RemoteArchive]) -> Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;

        for archive in archives {
            let compressed = self.data_dir.join(&archive.name);
            let document = self.data_dir.join(document_name_for_archive(&archive.name));
            if compressed.exists() || document.exists() {
                debug!(archive = %archive.name, "Already present locally, skipping download");
                continue;
            }

            info!(archive = %archive.name, url = %archive.url, "Downloading archive");
            if let Err(e) = self.source.download(archive, &self.data_dir).await {
                error!(archive = %archive.name, error = %e, "Download failed");
            }
        }
        Ok(())
    }
}

/// Delete every file; a failed deletion is logged and skipped
async fn clean(files: &[PathBuf]) {
    let mut removed = 0;
    for file in files {
        match tokio::fs::remove_file(file).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(file = %file.display(), error = %e, "Failed to remove file"),
        }
    }
    info!(removed, total = files.len(), "Cleaned data directory");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn view(names: &[&str]) -> LocalView {
        LocalView::from_paths(names.iter().map(|n| PathBuf::from("/data").join(n)))
    }

    fn ingested(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn remote(n: usize) -> Vec<RemoteArchive> {
        (1..=n)
            .map(|i| RemoteArchive::new("https://example.org/", format!("pubmed25n{:04}.xml.gz", i)))
            .collect()
    }

    #[test]
    fn test_sequence_number() {
        assert_eq!(sequence_number("pubmed25n0042.xml.gz"), 42);
        assert_eq!(sequence_number("README"), 0);
    }

    #[test]
    fn test_view_sorts_by_sequence_number() {
        let v = view(&["pubmed25n0010.xml", "pubmed25n0002.xml", "notes.txt", "pubmed25n0003.xml.gz.part"]);

        assert_eq!(file_names(&v.documents), vec!["pubmed25n0002.xml", "pubmed25n0010.xml"]);
        assert_eq!(v.partials.len(), 1);
        assert!(v.archives.is_empty());
    }

    #[test]
    fn test_document_takes_priority_over_archive() {
        let v = view(&["pubmed25n0001.xml.gz", "pubmed25n0001.xml"]);

        let step = evaluate_local(&v, &HashSet::new()).unwrap();

        assert_eq!(
            step,
            Step::ProcessDocuments {
                documents: vec![PathBuf::from("/data/pubmed25n0001.xml")]
            }
        );
    }

    #[test]
    fn test_archive_without_document_is_decompressed() {
        let v = view(&["pubmed25n0002.xml.gz", "pubmed25n0001.xml.gz"]);

        let step = evaluate_local(&v, &ingested(&["pubmed25n0001.xml.gz"])).unwrap();

        assert_eq!(
            step,
            Step::Decompress {
                archives: vec![PathBuf::from("/data/pubmed25n0002.xml.gz")]
            }
        );
    }

    #[test]
    fn test_ingested_leftovers_are_cleaned() {
        let v = view(&["pubmed25n0001.xml.gz", "pubmed25n0001.xml", "pubmed25n0002.xml.gz.part"]);

        let step = evaluate_local(&v, &ingested(&["pubmed25n0001.xml.gz"])).unwrap();

        assert_eq!(step.state(), State::Clean);
        assert!(matches!(step, Step::Clean { ref files } if files.len() == 3));
    }

    #[test]
    fn test_empty_directory_defers_to_discovery() {
        assert_eq!(evaluate_local(&LocalView::default(), &HashSet::new()), None);
    }

    #[test]
    fn test_acquisition_caps_at_five() {
        let step = acquisition_step(remote(7), 5, Duration::from_secs(3600));

        match step {
            Step::Acquire { archives } => {
                assert_eq!(archives.len(), 5);
                assert_eq!(archives[0].name, "pubmed25n0001.xml.gz");
            },
            other => panic!("expected acquire, got {}", other),
        }
    }

    #[test]
    fn test_nothing_discovered_idles() {
        let step = acquisition_step(Vec::new(), 5, Duration::from_secs(3600));
        assert_eq!(step, Step::Idle { duration: Duration::from_secs(3600) });
    }
}
