//! PubMed mirror, control-loop and search sink configuration

use pubmed_common::{env, CommonError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::Result;
use crate::ingest::common::RetryPolicy;

/// Full initial corpus
pub const DEFAULT_BASELINE_URL: &str = "https://ftp.ncbi.nlm.nih.gov/pubmed/baseline/";

/// Incremental daily deltas
pub const DEFAULT_UPDATE_URL: &str = "https://ftp.ncbi.nlm.nih.gov/pubmed/updatefiles/";

/// Archives downloaded per acquisition step
pub const DEFAULT_ACQUIRE_CAP: usize = 5;

/// Sleep when there is nothing to do (1 hour)
pub const DEFAULT_IDLE_SECS: u64 = 60 * 60;

/// Pause after each non-idle step
pub const DEFAULT_STEP_PAUSE_SECS: u64 = 5;

/// Documents per bulk request to the search index
pub const DEFAULT_SEARCH_CHUNK_SIZE: usize = 15_000;

/// Default search index name
pub const DEFAULT_SEARCH_INDEX: &str = "pubmed-articles";

/// Configuration for the PubMed mirror and the ingestion loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubmedConfig {
    /// Baseline directory listing URL (always tried first)
    pub baseline_url: String,
    /// Update-file directory listing URL
    pub update_url: String,
    /// Working directory for archives and documents
    pub data_dir: PathBuf,
    /// HTTP request timeout in seconds (default: 600, archives are large)
    pub http_timeout_secs: u64,
    pub user_agent: String,
    /// Maximum archives fetched in one acquisition step
    pub acquire_cap: usize,
    pub idle_secs: u64,
    pub step_pause_secs: u64,
    pub decompress_attempts: u32,
    /// First decompression backoff; doubles per attempt
    pub decompress_backoff_secs: u64,
    pub sink_attempts: u32,
    /// Store-write backoff step; multiplied by the attempt number
    pub sink_backoff_secs: u64,
}

impl Default for PubmedConfig {
    fn default() -> Self {
        Self {
            baseline_url: DEFAULT_BASELINE_URL.to_string(),
            update_url: DEFAULT_UPDATE_URL.to_string(),
            data_dir: PathBuf::from("./data/pubmed"),
            http_timeout_secs: 600,
            user_agent: "pubmed-sync/0.1".to_string(),
            acquire_cap: DEFAULT_ACQUIRE_CAP,
            idle_secs: DEFAULT_IDLE_SECS,
            step_pause_secs: DEFAULT_STEP_PAUSE_SECS,
            decompress_attempts: 2,
            decompress_backoff_secs: 2,
            sink_attempts: 2,
            sink_backoff_secs: 60,
        }
    }
}

impl PubmedConfig {
    /// Load from `PUBMED_*` environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            baseline_url: env::var_or("PUBMED_BASELINE_URL", &defaults.baseline_url),
            update_url: env::var_or("PUBMED_UPDATE_URL", &defaults.update_url),
            data_dir: env::var_opt("PUBMED_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            http_timeout_secs: env::parse_or("PUBMED_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs)?,
            user_agent: env::var_or("PUBMED_USER_AGENT", &defaults.user_agent),
            acquire_cap: env::parse_or("PUBMED_ACQUIRE_CAP", defaults.acquire_cap)?,
            idle_secs: env::parse_or("PUBMED_IDLE_SECS", defaults.idle_secs)?,
            step_pause_secs: env::parse_or("PUBMED_STEP_PAUSE_SECS", defaults.step_pause_secs)?,
            decompress_attempts: env::parse_or(
                "PUBMED_DECOMPRESS_ATTEMPTS",
                defaults.decompress_attempts,
            )?,
            decompress_backoff_secs: env::parse_or(
                "PUBMED_DECOMPRESS_BACKOFF_SECS",
                defaults.decompress_backoff_secs,
            )?,
            sink_attempts: env::parse_or("PUBMED_SINK_ATTEMPTS", defaults.sink_attempts)?,
            sink_backoff_secs: env::parse_or("PUBMED_SINK_BACKOFF_SECS", defaults.sink_backoff_secs)?,
        };

        config.validate().map_err(CommonError::Config)?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.baseline_url.is_empty() || self.update_url.is_empty() {
            return Err("PubMed origin URLs cannot be empty".to_string());
        }
        if self.acquire_cap == 0 {
            return Err("PUBMED_ACQUIRE_CAP must be greater than 0".to_string());
        }
        if self.decompress_attempts == 0 || self.sink_attempts == 0 {
            return Err("Retry attempt budgets must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Origins in priority order: baseline before updates
    pub fn origins(&self) -> Vec<String> {
        vec![self.baseline_url.clone(), self.update_url.clone()]
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_origins(mut self, baseline: impl Into<String>, update: impl Into<String>) -> Self {
        self.baseline_url = baseline.into();
        self.update_url = update.into();
        self
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    pub fn step_pause(&self) -> Duration {
        Duration::from_secs(self.step_pause_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Doubling backoff: 2s, 4s, ...
    pub fn decompress_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.decompress_attempts,
            Duration::from_secs(self.decompress_backoff_secs),
        )
    }

    /// Linear backoff: 60s, 120s, ...
    pub fn sink_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(self.sink_attempts, Duration::from_secs(self.sink_backoff_secs))
    }
}

/// Search sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Base URL of the search cluster, e.g. `http://localhost:9200`
    pub url: String,
    pub index: String,
    /// Sent as `Authorization: ApiKey <key>` when set
    pub api_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub chunk_size: usize,
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            index: DEFAULT_SEARCH_INDEX.to_string(),
            api_key: None,
            username: None,
            password: None,
            chunk_size: DEFAULT_SEARCH_CHUNK_SIZE,
            timeout_secs: 3600,
        }
    }
}

impl SearchConfig {
    /// Load from `SEARCH_*` environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            url: env::var_or("SEARCH_URL", &defaults.url),
            index: env::var_or("SEARCH_INDEX", &defaults.index),
            api_key: env::var_opt("SEARCH_API_KEY"),
            username: env::var_opt("SEARCH_USERNAME"),
            password: env::var_opt("SEARCH_PASSWORD"),
            chunk_size: env::parse_or("SEARCH_CHUNK_SIZE", defaults.chunk_size)?,
            timeout_secs: env::parse_or("SEARCH_TIMEOUT_SECS", defaults.timeout_secs)?,
        };

        config.validate().map_err(CommonError::Config)?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.url.is_empty() {
            return Err("SEARCH_URL cannot be empty".to_string());
        }
        if self.index.is_empty() {
            return Err("SEARCH_INDEX cannot be empty".to_string());
        }
        if self.chunk_size == 0 {
            return Err("SEARCH_CHUNK_SIZE must be greater than 0".to_string());
        }
        Ok(())
    }
}
