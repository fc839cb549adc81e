//! Shared utilities for data ingestion
//!
//! - `decompression`: streaming gzip file decompression
//! - `retry`: retry policies with injectable sleeping

pub mod decompression;
pub mod retry;

pub use retry::{Backoff, RetryPolicy, Sleeper, TokioSleeper};
