//! PubMed Sync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the PubMed sync workspace.
//!
//! # Overview
//!
//! - **Types**: the normalized article [`Record`](types::Record) and its parts
//! - **Logging**: `tracing` subscriber setup driven by environment variables
//! - **Errors**: [`CommonError`] and the matching [`Result`] alias
//! - **Env**: typed environment variable lookups for configuration loaders
//!
//! # Example
//!
//! ```no_run
//! use pubmed_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     Ok(())
//! }
//! ```

pub mod env;
pub mod error;
pub mod logging;
pub mod types;

pub use error::{CommonError, Result};
