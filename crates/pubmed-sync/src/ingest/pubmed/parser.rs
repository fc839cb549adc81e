//! PubMed article normalization
//!
//! Turns one `PubmedArticle` element into a [`Record`]. The mandatory fields
//! are the PMID, the article title and a resolvable `pubmed` publication date;
//! an article missing any of them yields `None`. Every optional field is an
//! explicit `Option`/empty list, never an error.

use chrono::{Datelike, NaiveDate};
use pubmed_common::types::{Author, Chemical, Grant, Keyword, MeshHeading, Record, Reference};
use std::path::Path;
use tracing::{debug, info};

use super::xml::{ArticleReader, Element};
use super::Result;

/// `PubStatus` tag of the primary publication date
pub const PUBLISHED_STATUS: &str = "pubmed";
pub const ACCEPTED_STATUS: &str = "accepted";
pub const RECEIVED_STATUS: &str = "received";

/// Per-file parse summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub parsed: usize,
    pub skipped: usize,
}

impl ParseStats {
    pub fn total(&self) -> usize {
        self.parsed + self.skipped
    }
}

/// Parse every article in a decompressed document
///
/// Keeps one slot per article; malformed articles are `None`.
pub fn parse_document_file(path: &Path) -> Result<(Vec<Option<Record>>, ParseStats)> {
    let mut records = Vec::new();
    let mut stats = ParseStats::default();

    for article in ArticleReader::from_file(path)? {
        let record = parse_article(&article?);
        match record {
            Some(_) => stats.parsed += 1,
            None => stats.skipped += 1,
        }
        records.push(record);
    }

    info!(
        file = %path.display(),
        parsed = stats.parsed,
        skipped = stats.skipped,
        "Parsed document"
    );
    Ok((records, stats))
}

/// Parse an in-memory document; used by tests and the `parse` subcommand
pub fn parse_document_bytes(bytes: &[u8]) -> Result<Vec<Option<Record>>> {
    ArticleReader::from_bytes(bytes)
        .map(|article| article.map(|a| parse_article(&a)))
        .collect()
}

/// Normalize one article, or `None` when a mandatory field is missing
pub fn parse_article(article: &Element) -> Option<Record> {
    let pubmed_id = article.find(".//PMID")?.text.trim().to_string();
    if pubmed_id.is_empty() {
        debug!("Skipping article without PMID");
        return None;
    }

    let title = article.find(".//ArticleTitle")?.flat_text().trim().to_string();

    let Some(pub_date) = resolve_date(article, PUBLISHED_STATUS) else {
        debug!(pmid = %pubmed_id, "Skipping article without a resolvable publication date");
        return None;
    };

    let mut record = Record::new(pubmed_id, title, pub_date);
    record.accepted_date = resolve_date(article, ACCEPTED_STATUS);
    record.received_date = resolve_date(article, RECEIVED_STATUS);
    record.authors = authors(article);
    record.keywords = keywords(article);
    record.grants = grants(article);
    record.mesh_headings = mesh_headings(article);
    record.chemicals = chemicals(article);
    record.references = references(article);
    record.r#abstract = abstract_text(article);
    record.doi = non_empty(article.find_text(".//ArticleId[@IdType='doi']"));
    record.journal = article
        .find(".//Journal/Title")
        .and_then(|t| non_empty(t.flat_text().trim()));
    record.nlm_unique_id = non_empty(article.find_text(".//NlmUniqueID"));
    record.pub_types = article
        .find_all(".//PublicationType")
        .into_iter()
        .map(|t| t.text.trim().to_string())
        .collect();

    Some(record)
}

/// Resolve the first `PubMedPubDate` with the given `PubStatus`
pub fn resolve_date(article: &Element, status: &str) -> Option<NaiveDate> {
    let path = format!(".//PubMedPubDate[@PubStatus='{}']", status);
    let date = article.find(&path)?;

    let year = parse_component(date, "Year")?;
    let month = parse_component(date, "Month").unwrap_or(1);
    let day = parse_component(date, "Day").unwrap_or(1);

    calendar_date(year, month, day)
}

/// Build a calendar date, defaulting the month and clamping the day
///
/// The year must be within 1..=9999 so it always renders as four digits.
/// A month outside 1..=12 falls back to January; a day past the end of the
/// month becomes its last day.
pub fn calendar_date(year: i64, month: i64, day: i64) -> Option<NaiveDate> {
    if !(1..=9999).contains(&year) {
        return None;
    }
    let year = year as i32;
    let month = if (1..=12).contains(&month) { month as u32 } else { 1 };
    let last = last_day_of_month(year, month)?;
    let day = day.clamp(1, i64::from(last)) as u32;

    NaiveDate::from_ymd_opt(year, month, day)
}

fn last_day_of_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let first_of_next = NaiveDate::from_ymd_opt(next_year, next_month, 1)?;
    first_of_next.pred_opt().map(|d| d.day())
}

fn parse_component(date: &Element, name: &str) -> Option<i64> {
    date.find(name)?.text.trim().parse().ok()
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn authors(article: &Element) -> Vec<Author> {
    article
        .find_all(".//Author")
        .into_iter()
        .map(|author| {
            let name = format!(
                "{} {}",
                author.find_text("ForeName").trim(),
                author.find_text("LastName").trim()
            )
            .trim()
            .to_string();
            let affiliations = author
                .find_all("AffiliationInfo/Affiliation")
                .into_iter()
                .filter_map(|a| non_empty(&a.flat_text()))
                .collect();
            Author { name, affiliations }
        })
        .collect()
}

fn keywords(article: &Element) -> Vec<Keyword> {
    article
        .find_all(".//KeywordList/Keyword")
        .into_iter()
        .map(|k| Keyword {
            name: k.flat_text().trim().to_string(),
            major_topic: k.flag("MajorTopicYN"),
        })
        .collect()
}

fn grants(article: &Element) -> Vec<Grant> {
    article
        .find_all(".//GrantList/Grant")
        .into_iter()
        .map(|g| Grant {
            grant_id: g.find_text("GrantID").trim().to_string(),
            grant_country: g.find_text("Country").trim().to_string(),
            agency: g.find_text("Agency").trim().to_string(),
        })
        .filter(|g| !(g.grant_id.is_empty() && g.grant_country.is_empty() && g.agency.is_empty()))
        .collect()
}

fn mesh_headings(article: &Element) -> Vec<MeshHeading> {
    article
        .find_all(".//MeshHeadingList/MeshHeading")
        .into_iter()
        .filter_map(|heading| {
            let descriptor = heading.find("DescriptorName")?;
            let name = non_empty(&descriptor.text)?;
            Some(MeshHeading {
                name,
                major_topic: descriptor.flag("MajorTopicYN"),
            })
        })
        .collect()
}

fn chemicals(article: &Element) -> Vec<Chemical> {
    article
        .find_all(".//ChemicalList/Chemical")
        .into_iter()
        .map(|c| Chemical {
            name: c.find_text("NameOfSubstance").trim().to_string(),
            registry_number: c.find_text("RegistryNumber").trim().to_string(),
        })
        .collect()
}

fn references(article: &Element) -> Vec<Reference> {
    article
        .find_all(".//ReferenceList/Reference")
        .into_iter()
        .map(|r| Reference {
            citation: r.find_text("Citation").trim().to_string(),
            pubmed_id: r
                .find(".//ArticleIdList/ArticleId[@IdType='pubmed']")
                .and_then(|id| non_empty(&id.text)),
        })
        .collect()
}

/// All abstract sections, each trimmed, joined by a single space
fn abstract_text(article: &Element) -> Option<String> {
    let sections = article.find_all(".//AbstractText");
    if sections.is_empty() {
        return None;
    }
    Some(
        sections
            .into_iter()
            .map(|s| s.flat_text().trim().to_string())
            .collect::<Vec<_>>()
            .join(" "),
    )
}
