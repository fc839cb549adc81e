//! pubmed-sync - Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pubmed_common::logging::{init_logging, LogConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use pubmed_sync::config::Config;
use pubmed_sync::db;
use pubmed_sync::ingest::common::TokioSleeper;
use pubmed_sync::ingest::pubmed::parser::parse_document_bytes;
use pubmed_sync::ingest::pubmed::{
    DualSinkWriter, ElasticIndex, IngestionLedger, IngestionStateMachine, MySqlArticleStore,
    MySqlLedger, PubmedMirror,
};

/// Mirror PubMed into MySQL and Elasticsearch
#[derive(Parser)]
#[command(name = "pubmed-sync", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the ingestion loop forever (default)
    Run,
    /// Evaluate and execute exactly one step
    Step,
    /// Print the next step without executing it
    Plan,
    /// Parse a local XML document and print its records as JSON lines
    Parse {
        /// Decompressed PubMed XML file
        file: PathBuf,
    },
    /// Print the names of ingested archives
    Ledger,
    /// Rebuild the search index from the articles table
    Reindex {
        /// Articles read from the database per page
        #[arg(long, default_value_t = 10_000)]
        page_size: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .log_file_prefix("pubmed-sync")
        .filter_directives("pubmed_sync=info,sqlx=warn")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Parse { file } => parse(file).await,
        command => {
            let config = Config::load().context("Failed to load configuration")?;
            let pool = db::create_pool(&config.database)
                .await
                .context("Failed to connect to the database")?;
            db::health_check(&pool).await?;
            db::run_migrations(&pool).await?;

            let ledger = Arc::new(MySqlLedger::new(pool.clone()));
            if let Command::Ledger = command {
                let mut names: Vec<String> = ledger.list_ingested().await?.into_iter().collect();
                names.sort();
                for name in names {
                    println!("{}", name);
                }
                return Ok(());
            }

            let sleeper = Arc::new(TokioSleeper);
            let writer = DualSinkWriter::new(
                Arc::new(MySqlArticleStore::new(pool)),
                Arc::new(ElasticIndex::new(&config.search)?),
                config.pubmed.sink_policy(),
                config.search.chunk_size,
                sleeper.clone(),
            );

            if let Command::Reindex { page_size } = command {
                let report = writer.rebuild_index(page_size).await?;
                info!(
                    pages = report.pages,
                    indexed = report.indexed.successful,
                    chunks = report.chunks,
                    "Rebuilt search index"
                );
                return Ok(());
            }

            let machine = IngestionStateMachine::new(
                &config.pubmed,
                Arc::new(PubmedMirror::new(&config.pubmed)?),
                writer,
                ledger,
                sleeper,
            );

            match command {
                Command::Plan => {
                    let step = machine.next_step().await?;
                    println!("{}", step);
                },
                Command::Step => {
                    let state = machine.run_once().await?;
                    info!(state = %state, "Executed one step");
                },
                _ => machine.run_forever().await,
            }
            Ok(())
        },
    }
}

async fn parse(file: PathBuf) -> Result<()> {
    let bytes = tokio::fs::read(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let records = parse_document_bytes(&bytes)?;
    let mut skipped = 0;
    for record in records {
        match record {
            Some(record) => println!("{}", serde_json::to_string(&record)?),
            None => skipped += 1,
        }
    }

    info!(file = %file.display(), skipped, "Parsed document");
    Ok(())
}
