//! Remote archive discovery and download
//!
//! NCBI publishes the corpus as plain HTTP directory listings. Discovery
//! scrapes the `<a href>` targets ending in `.gz`; download streams one archive
//! to disk without buffering it.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::config::PubmedConfig;
use super::{IngestError, Result, ARCHIVE_EXTENSION};
use crate::ingest::common::decompression::partial_path;

/// One archive available at a remote origin
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteArchive {
    /// File name, e.g. `pubmed25n0001.xml.gz`
    pub name: String,
    /// Absolute download URL
    pub url: String,
}

impl RemoteArchive {
    pub fn new(origin: &str, name: impl Into<String>) -> Self {
        let name = name.into();
        let url = if origin.ends_with('/') {
            format!("{}{}", origin, name)
        } else {
            format!("{}/{}", origin, name)
        };
        Self { name, url }
    }
}

/// Source of remote archives
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Archives not in `seen`, from the first origin that has any
    async fn discover(&self, seen: &HashSet<String>) -> Result<Vec<RemoteArchive>>;

    /// Download `archive` into `dir`, returning the local path
    async fn download(&self, archive: &RemoteArchive, dir: &Path) -> Result<PathBuf>;
}

/// HTTP mirror of the NCBI PubMed directories
pub struct PubmedMirror {
    origins: Vec<String>,
    client: Client,
}

impl PubmedMirror {
    pub fn new(config: &PubmedConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout())
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            origins: config.origins(),
            client,
        })
    }

    async fn fetch_directory_listing(&self, url: &str) -> Result<String> {
        debug!(url, "Fetching directory listing");

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(IngestError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl ArchiveSource for PubmedMirror {
    async fn discover(&self, seen: &HashSet<String>) -> Result<Vec<RemoteArchive>> {
        for origin in &self.origins {
            let html = self.fetch_directory_listing(origin).await?;
            let names = parse_directory_listing(&html, seen)?;

            if !names.is_empty() {
                info!(origin = %origin, count = names.len(), "Discovered new archives");
                return Ok(names
                    .into_iter()
                    .map(|name| RemoteArchive::new(origin, name))
                    .collect());
            }
            debug!(origin = %origin, "No unseen archives at origin");
        }

        Ok(Vec::new())
    }

    async fn download(&self, archive: &RemoteArchive, dir: &Path) -> Result<PathBuf> {
        let target = dir.join(&archive.name);
        let partial = partial_path(&target);

        let response = self.client.get(&archive.url).send().await?;
        if !response.status().is_success() {
            return Err(IngestError::HttpStatus {
                url: archive.url.clone(),
                status: response.status().as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    if let Err(rm) = tokio::fs::remove_file(&partial).await {
                        warn!(file = %partial.display(), error = %rm, "Failed to remove partial download");
                    }
                    return Err(e.into());
                },
            };
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
        }

        file.flush().await?;
        drop(file);
        tokio::fs::rename(&partial, &target).await?;

        info!(archive = %archive.name, bytes = downloaded, "Downloaded archive");
        Ok(target)
    }
}

/// Archive names linked from an HTML listing, minus `seen`
///
/// Hrefs are reduced to their last path segment and de-duplicated, keeping
/// listing order. Checksum siblings (`.gz.md5`) do not match.
pub fn parse_directory_listing(html: &str, seen: &HashSet<String>) -> Result<Vec<String>> {
    let document = Html::parse_document(html);
    let links = Selector::parse("a[href]").map_err(|e| IngestError::Listing(e.to_string()))?;

    let mut emitted = HashSet::new();
    let mut names = Vec::new();

    for element in document.select(&links) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.split(['?', '#']).next().unwrap_or(href);
        let name = href.rsplit('/').next().unwrap_or(href);

        if !name.ends_with(ARCHIVE_EXTENSION) || name.len() == ARCHIVE_EXTENSION.len() {
            continue;
        }
        if seen.contains(name) || !emitted.insert(name.to_string()) {
            continue;
        }
        names.push(name.to_string());
    }

    Ok(names)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<html><body><pre>
<a href="../">Parent Directory</a>
<a href="README.txt">README.txt</a>
<a href="pubmed25n0001.xml.gz">pubmed25n0001.xml.gz</a>
<a href="pubmed25n0001.xml.gz.md5">pubmed25n0001.xml.gz.md5</a>
<a href="pubmed25n0002.xml.gz">pubmed25n0002.xml.gz</a>
<a href="/pubmed/baseline/pubmed25n0003.xml.gz">pubmed25n0003.xml.gz</a>
<a href="pubmed25n0002.xml.gz">again</a>
</pre></body></html>"#;

    #[test]
    fn test_listing_keeps_gz_links_in_order() {
        let names = parse_directory_listing(LISTING, &HashSet::new()).unwrap();

        assert_eq!(
            names,
            vec!["pubmed25n0001.xml.gz", "pubmed25n0002.xml.gz", "pubmed25n0003.xml.gz"]
        );
    }

    #[test]
    fn test_listing_skips_seen_names() {
        let seen: HashSet<String> = ["pubmed25n0001.xml.gz".to_string()].into_iter().collect();

        let names = parse_directory_listing(LISTING, &seen).unwrap();

        assert_eq!(names, vec!["pubmed25n0002.xml.gz", "pubmed25n0003.xml.gz"]);
    }

    #[test]
    fn test_remote_archive_url_join() {
        let a = RemoteArchive::new("https://example.org/baseline/", "x.xml.gz");
        let b = RemoteArchive::new("https://example.org/baseline", "x.xml.gz");
        assert_eq!(a.url, "https://example.org/baseline/x.xml.gz");
        assert_eq!(a, b);
    }
}
