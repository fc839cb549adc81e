//! Relational sink for normalized articles

use async_trait::async_trait;
use chrono::NaiveDate;
use pubmed_common::types::Record;
use sqlx::mysql::MySqlRow;
use sqlx::{MySql, MySqlPool, QueryBuilder, Row};
use tracing::{debug, info};

use super::Result;

/// Rows per INSERT statement
///
/// 8 bound columns per row keeps each statement under the 65,535
/// placeholder limit of the MySQL protocol.
pub const MAX_ROWS_PER_STATEMENT: usize = 8_000;

const UPSERT_PREFIX: &str = "INSERT INTO pubmed_articles \
     (pubmed_id, title, pub_date, doi, journal, nlm_unique_id, pub_types, abstract) ";

const UPSERT_SUFFIX: &str = " ON DUPLICATE KEY UPDATE \
     title = VALUES(title), \
     pub_date = VALUES(pub_date), \
     doi = VALUES(doi), \
     journal = VALUES(journal), \
     nlm_unique_id = VALUES(nlm_unique_id), \
     pub_types = VALUES(pub_types), \
     abstract = VALUES(abstract), \
     last_update = NOW()";

const SELECT_PAGE: &str = "SELECT pubmed_id, title, pub_date, doi, journal, nlm_unique_id, \
     CAST(pub_types AS CHAR) AS pub_types, abstract \
     FROM pubmed_articles WHERE pubmed_id > ? ORDER BY pubmed_id LIMIT ?";

/// System-of-record store for articles
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Verify (and if needed re-establish) the connection; idempotent
    async fn ensure_connected(&self) -> Result<()>;

    /// Insert or overwrite `records` keyed by PMID; all rows commit together
    async fn upsert_articles(&self, records: &[Record]) -> Result<u64>;

    /// Up to `limit` stored articles with a PMID ordered after `after`
    ///
    /// Only the stored columns come back; lists other than the publication
    /// types are empty.
    async fn articles_after(&self, after: &str, limit: usize) -> Result<Vec<Record>>;
}

/// Column values for one `pubmed_articles` row
///
/// Empty strings and empty lists become NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleRow {
    pub pubmed_id: String,
    pub title: Option<String>,
    pub pub_date: NaiveDate,
    pub doi: Option<String>,
    pub journal: Option<String>,
    pub nlm_unique_id: Option<String>,
    /// JSON array text
    pub pub_types: Option<String>,
    pub r#abstract: Option<String>,
}

impl ArticleRow {
    pub fn from_record(record: &Record) -> Result<Self> {
        let pub_types = if record.pub_types.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&record.pub_types)?)
        };

        Ok(Self {
            pubmed_id: record.pubmed_id.clone(),
            title: nullable(Some(&record.title)),
            pub_date: record.pub_date,
            doi: nullable(record.doi.as_ref()),
            journal: nullable(record.journal.as_ref()),
            nlm_unique_id: nullable(record.nlm_unique_id.as_ref()),
            pub_types,
            r#abstract: nullable(record.r#abstract.as_ref()),
        })
    }

    fn from_row(row: &MySqlRow) -> Result<Self> {
        Ok(Self {
            pubmed_id: row.try_get("pubmed_id")?,
            title: row.try_get("title")?,
            pub_date: row.try_get("pub_date")?,
            doi: row.try_get("doi")?,
            journal: row.try_get("journal")?,
            nlm_unique_id: row.try_get("nlm_unique_id")?,
            pub_types: row.try_get("pub_types")?,
            r#abstract: row.try_get("abstract")?,
        })
    }

    /// Record carrying the stored columns
    pub fn into_record(self) -> Result<Record> {
        let mut record = Record::new(self.pubmed_id, self.title.unwrap_or_default(), self.pub_date);
        record.doi = self.doi;
        record.journal = self.journal;
        record.nlm_unique_id = self.nlm_unique_id;
        record.r#abstract = self.r#abstract;
        if let Some(pub_types) = self.pub_types {
            record.pub_types = serde_json::from_str(&pub_types)?;
        }
        Ok(record)
    }
}

fn nullable(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

/// Build one multi-row upsert statement
pub fn build_upsert(rows: &[ArticleRow]) -> QueryBuilder<'_, MySql> {
    let mut query_builder = QueryBuilder::new(UPSERT_PREFIX);

    query_builder.push_values(rows.iter(), |mut b, row| {
        b.push_bind(&row.pubmed_id)
            .push_bind(&row.title)
            .push_bind(row.pub_date)
            .push_bind(&row.doi)
            .push_bind(&row.journal)
            .push_bind(&row.nlm_unique_id)
            .push_bind(&row.pub_types)
            .push_bind(&row.r#abstract);
    });
    query_builder.push(UPSERT_SUFFIX);

    query_builder
}

/// MySQL-backed [`ArticleStore`]
#[derive(Clone)]
pub struct MySqlArticleStore {
    pool: MySqlPool,
}

impl MySqlArticleStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArticleStore for MySqlArticleStore {
    async fn ensure_connected(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert_articles(&self, records: &[Record]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let rows = records
            .iter()
            .map(ArticleRow::from_record)
            .collect::<Result<Vec<_>>>()?;

        let mut tx = self.pool.begin().await?;
        let mut affected = 0;

        for chunk in rows.chunks(MAX_ROWS_PER_STATEMENT) {
            let result = build_upsert(chunk).build().execute(&mut *tx).await?;
            affected += result.rows_affected();
            debug!(rows = chunk.len(), "Executed article upsert statement");
        }

        tx.commit().await?;

        info!(records = records.len(), rows_affected = affected, "Upserted articles");
        Ok(affected)
    }

    async fn articles_after(&self, after: &str, limit: usize) -> Result<Vec<Record>> {
        let rows = sqlx::query(SELECT_PAGE)
            .bind(after)
            .bind(limit as u64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| ArticleRow::from_row(row)?.into_record())
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn record() -> Record {
        let mut record = Record::new("42", "", NaiveDate::from_ymd_opt(2020, 1, 2).unwrap());
        record.doi = Some("10.1/x".to_string());
        record.journal = Some(String::new());
        record.pub_types = vec!["Journal Article".to_string(), "Review".to_string()];
        record
    }

    #[test]
    fn test_row_nulls_empty_values() {
        let row = ArticleRow::from_record(&record()).unwrap();

        assert_eq!(row.title, None);
        assert_eq!(row.journal, None);
        assert_eq!(row.doi.as_deref(), Some("10.1/x"));
        assert_eq!(row.r#abstract, None);
        assert_eq!(row.pub_types.as_deref(), Some(r#"["Journal Article","Review"]"#));
    }

    #[test]
    fn test_stored_row_reads_back_as_record() {
        let row = ArticleRow::from_record(&record()).unwrap();

        let restored = row.into_record().unwrap();

        assert_eq!(restored.pubmed_id, "42");
        assert_eq!(restored.title, "");
        assert_eq!(restored.journal, None);
        assert_eq!(restored.pub_types, vec!["Journal Article", "Review"]);
        assert!(restored.authors.is_empty());
    }

    #[test]
    fn test_upsert_statement_shape() {
        let rows = vec![
            ArticleRow::from_record(&record()).unwrap(),
            ArticleRow::from_record(&record()).unwrap(),
        ];
        let query_builder = build_upsert(&rows);
        let sql = query_builder.sql();

        assert!(sql.starts_with(
            "INSERT INTO pubmed_articles (pubmed_id, title, pub_date, doi, journal, nlm_unique_id, pub_types, abstract) VALUES "
        ));
        assert_eq!(sql.matches('?').count(), 16);
        assert!(sql.contains("ON DUPLICATE KEY UPDATE title = VALUES(title)"));
        assert!(sql.ends_with("last_update = NOW()"));
        assert!(!sql.contains("pubmed_id = VALUES"));
    }
}
