//! Durable record of fully ingested archives
//!
//! An archive name is written here only after every record parsed from it
//! was accepted by both sinks, so membership is a safe skip signal for
//! discovery and for local state evaluation.

use async_trait::async_trait;
use sqlx::{MySql, MySqlPool, QueryBuilder};
use std::collections::HashSet;
use tracing::{debug, info};

use super::Result;

const LEDGER_INSERT_PREFIX: &str = "INSERT INTO indexed_pubmed_files (file_name) ";
const LEDGER_INSERT_SUFFIX: &str = " ON DUPLICATE KEY UPDATE last_update = NOW()";

#[async_trait]
pub trait IngestionLedger: Send + Sync {
    /// Record one archive; re-recording only touches its update time
    async fn record_ingested(&self, file_name: &str) -> Result<()> {
        self.record_ingested_batch(&[file_name.to_string()]).await
    }

    async fn record_ingested_batch(&self, file_names: &[String]) -> Result<()>;

    async fn list_ingested(&self) -> Result<HashSet<String>>;
}

/// Multi-row ledger upsert
pub fn build_ledger_upsert(file_names: &[String]) -> QueryBuilder<'_, MySql> {
    let mut query_builder = QueryBuilder::new(LEDGER_INSERT_PREFIX);
    query_builder.push_values(file_names.iter(), |mut b, name| {
        b.push_bind(name);
    });
    query_builder.push(LEDGER_INSERT_SUFFIX);
    query_builder
}

/// `indexed_pubmed_files` table
#[derive(Clone)]
pub struct MySqlLedger {
    pool: MySqlPool,
}

impl MySqlLedger {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IngestionLedger for MySqlLedger {
    async fn record_ingested_batch(&self, file_names: &[String]) -> Result<()> {
        if file_names.is_empty() {
            return Ok(());
        }

        build_ledger_upsert(file_names)
            .build()
            .execute(&self.pool)
            .await?;

        info!(files = ?file_names, "Recorded ingested archives");
        Ok(())
    }

    async fn list_ingested(&self) -> Result<HashSet<String>> {
        let names: Vec<String> = sqlx::query_scalar("SELECT file_name FROM indexed_pubmed_files")
            .fetch_all(&self.pool)
            .await?;

        debug!(count = names.len(), "Loaded ingestion ledger");
        Ok(names.into_iter().collect())
    }
}
