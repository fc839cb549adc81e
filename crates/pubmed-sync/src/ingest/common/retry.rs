//! Retry policy shared by every call site that retries
//!
//! A [`RetryPolicy`] is a plain value (attempt budget + backoff schedule).
//! [`RetryPolicy::run_if`] applies it to an async operation and sleeps through
//! an injected [`Sleeper`], so tests can observe the schedule without waiting.
//!
//! ```no_run
//! use pubmed_sync::ingest::common::decompression::gunzip_file;
//! use pubmed_sync::ingest::common::{RetryPolicy, TokioSleeper};
//! use pubmed_sync::ingest::pubmed::IngestError;
//! use std::path::PathBuf;
//! use std::time::Duration;
//!
//! async fn unpack(archive: PathBuf) -> Result<PathBuf, IngestError> {
//!     let policy = RetryPolicy::exponential(2, Duration::from_secs(2));
//!     policy
//!         .run(&TokioSleeper, "decompress", |_attempt| {
//!             let archive = archive.clone();
//!             async move { tokio::task::spawn_blocking(move || gunzip_file(&archive)).await? }
//!         })
//!         .await
//! }
//! ```

use async_trait::async_trait;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Something that can pause the current task
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Delay schedule between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `initial`, `2 * initial`, `4 * initial`, ...
    Exponential { initial: Duration },
    /// `step`, `2 * step`, `3 * step`, ...
    Linear { step: Duration },
}

/// Attempt budget plus backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn exponential(max_attempts: u32, initial: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential { initial },
        }
    }

    pub fn linear(max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Linear { step },
        }
    }

    /// Delay after the failed `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.backoff {
            Backoff::Exponential { initial } => {
                initial.saturating_mul(2u32.saturating_pow(attempt - 1))
            },
            Backoff::Linear { step } => step.saturating_mul(attempt),
        }
    }

    /// Run `op` until it succeeds or the budget is spent
    pub async fn run<T, E, F, Fut>(&self, sleeper: &dyn Sleeper, label: &str, op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.run_if(sleeper, label, op, |_| true).await
    }

    /// Like [`run`](Self::run), but gives up immediately on errors for which
    /// `retryable` returns false
    ///
    /// `op` receives the 1-based attempt number. The sleep happens between
    /// attempts only; the last error is returned once the budget is spent.
    pub async fn run_if<T, E, F, Fut, R>(
        &self,
        sleeper: &dyn Sleeper,
        label: &str,
        mut op: F,
        retryable: R,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        R: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !retryable(&e) => {
                    error!(operation = label, attempt, error = %e, "Non-retryable failure");
                    return Err(e);
                },
                Err(e) if attempt >= max_attempts => {
                    error!(
                        operation = label,
                        attempts = max_attempts,
                        error = %e,
                        "Giving up after exhausting retries"
                    );
                    return Err(e);
                },
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        operation = label,
                        attempt,
                        max_attempts,
                        delay_secs = delay.as_secs_f64(),
                        error = %e,
                        "Attempt failed, backing off"
                    );
                    sleeper.sleep(delay).await;
                    attempt += 1;
                },
            }
        }
    }
}
