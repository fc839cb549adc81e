//! Data ingestion
//!
//! - `common`: retry policies and archive decompression
//! - `pubmed`: the PubMed mirror, parser, sinks and control loop

pub mod common;
pub mod pubmed;
