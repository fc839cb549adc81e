//! PubMed mirror and ingestion service
//!
//! Keeps a MySQL table and an Elasticsearch index in step with the NCBI
//! PubMed baseline and daily update files.
//!
//! # Example
//!
//! ```no_run
//! use pubmed_sync::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = pubmed_sync::db::create_pool(&config.database).await?;
//!     pubmed_sync::db::run_migrations(&pool).await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod db;
pub mod ingest;
