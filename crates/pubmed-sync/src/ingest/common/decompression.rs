//! Gzip decompression for downloaded archives
//!
//! Archives are single-member gzip files of several hundred megabytes once
//! expanded, so decompression streams from file to file and never holds the
//! payload in memory. The output is written to `<target>.part` and renamed
//! into place only after the stream finished cleanly.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::retry::{RetryPolicy, Sleeper};
use crate::ingest::pubmed::{IngestError, Result, ARCHIVE_EXTENSION, PARTIAL_EXTENSION};

/// Target path for an archive: the same path without the `.gz` suffix
pub fn decompressed_path(archive: &Path) -> Result<PathBuf> {
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| IngestError::Decompression(format!("Bad archive path {}", archive.display())))?;

    let stem = name.strip_suffix(ARCHIVE_EXTENSION).ok_or_else(|| {
        IngestError::Decompression(format!("{} is not a {} archive", name, ARCHIVE_EXTENSION))
    })?;

    Ok(archive.with_file_name(stem))
}

/// Stream-decompress `archive` next to itself and return the output path
///
/// Blocking; call from `spawn_blocking` inside async code.
pub fn gunzip_file(archive: &Path) -> Result<PathBuf> {
    let target = decompressed_path(archive)?;
    let partial = partial_path(&target);

    let copied = (|| -> io::Result<u64> {
        let input = BufReader::new(File::open(archive)?);
        let mut decoder = GzDecoder::new(input);
        let mut output = BufWriter::new(File::create(&partial)?);
        let copied = io::copy(&mut decoder, &mut output)?;
        output.flush()?;
        Ok(copied)
    })();

    match copied {
        Ok(bytes) => {
            std::fs::rename(&partial, &target)?;
            debug!(
                archive = %archive.display(),
                target = %target.display(),
                bytes,
                "Decompressed archive"
            );
            Ok(target)
        },
        Err(e) => {
            let _ = std::fs::remove_file(&partial);
            Err(IngestError::Decompression(format!("{}: {}", archive.display(), e)))
        },
    }
}

/// Decompress on a blocking worker, retrying per `policy`
pub async fn decompress_with_retry(
    archive: &Path,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
) -> Result<PathBuf> {
    let label = format!("decompress {}", archive.display());
    let target = policy
        .run(sleeper, &label, |_attempt| {
            let archive = archive.to_path_buf();
            async move { tokio::task::spawn_blocking(move || gunzip_file(&archive)).await? }
        })
        .await?;

    info!(archive = %archive.display(), target = %target.display(), "Unpacked archive");
    Ok(target)
}

/// `<path>.part`
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(PARTIAL_EXTENSION);
    PathBuf::from(name)
}
