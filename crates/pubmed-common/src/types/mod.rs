//! Normalized article types shared by the parser and both sinks

use chrono::NaiveDate;
use serde::{Deserialize, Serialize, Serializer};

/// Calendar date format used by every sink: 4-digit year, 2-digit month and day
pub const CALENDAR_DATE_FORMAT: &str = "%Y-%m-%d";

/// Render a date as `YYYY-MM-DD`
pub fn format_calendar_date(date: &NaiveDate) -> String {
    date.format(CALENDAR_DATE_FORMAT).to_string()
}

/// Re-validate a calendar string, returning it normalized or `None`
///
/// "2024-3-7" becomes "2024-03-07"; "2024-02-30" and "" are rejected.
pub fn normalize_calendar_date(value: &str) -> Option<String> {
    NaiveDate::parse_from_str(value.trim(), CALENDAR_DATE_FORMAT)
        .ok()
        .map(|d| format_calendar_date(&d))
}

fn serialize_date<S: Serializer>(date: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_calendar_date(date))
}

fn serialize_opt_date<S: Serializer>(date: &Option<NaiveDate>, s: S) -> Result<S::Ok, S::Error> {
    match date {
        Some(d) => s.serialize_str(&format_calendar_date(d)),
        None => s.serialize_none(),
    }
}

/// One article, flattened from a source document
///
/// `pubmed_id`, `title` and `pub_date` are always present; every other field
/// is only serialized when it carries a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub pubmed_id: String,
    pub title: String,
    #[serde(serialize_with = "serialize_date")]
    pub pub_date: NaiveDate,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_date"
    )]
    pub accepted_date: Option<NaiveDate>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_date"
    )]
    pub received_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nlm_unique_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pub_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<Author>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<Keyword>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grants: Vec<Grant>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mesh_headings: Vec<MeshHeading>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#abstract: Option<String>,
    /// Parsed for completeness; neither sink stores it
    #[serde(default, skip_serializing)]
    pub chemicals: Vec<Chemical>,
    /// Parsed for completeness; neither sink stores it
    #[serde(default, skip_serializing)]
    pub references: Vec<Reference>,
}

impl Record {
    /// Record with only the mandatory fields set
    pub fn new(pubmed_id: impl Into<String>, title: impl Into<String>, pub_date: NaiveDate) -> Self {
        Self {
            pubmed_id: pubmed_id.into(),
            title: title.into(),
            pub_date,
            accepted_date: None,
            received_date: None,
            doi: None,
            journal: None,
            nlm_unique_id: None,
            pub_types: Vec::new(),
            authors: Vec::new(),
            keywords: Vec::new(),
            grants: Vec::new(),
            mesh_headings: Vec::new(),
            r#abstract: None,
            chemicals: Vec::new(),
            references: Vec::new(),
        }
    }

    /// Publication date as `YYYY-MM-DD`
    pub fn pub_date_string(&self) -> String {
        format_calendar_date(&self.pub_date)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub affiliations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyword {
    pub name: String,
    #[serde(rename = "majorTopic")]
    pub major_topic: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub grant_id: String,
    pub grant_country: String,
    pub agency: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshHeading {
    pub name: String,
    #[serde(rename = "majorTopic")]
    pub major_topic: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chemical {
    pub name: String,
    pub registry_number: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub citation: String,
    pub pubmed_id: Option<String>,
}
