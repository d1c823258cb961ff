//! Content cache: the persistent dedup ledger.
//!
//! Every article the pipeline has ever considered owns exactly one row keyed by
//! its [`Identity`]. Rows are never deleted here. [`ContentCache::admit`] is the
//! single serialization point for dedup: only the first admit for an identity
//! succeeds, no matter which discoverer produced it or in which run.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::error::CacheError;
use crate::identity::Identity;
use crate::models::{
    AdmittedCandidate, CacheEntry, CandidateArticle, FetchStatus, FetchedArticle, IngestStatus,
};

/// Outcome of [`ContentCache::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    AlreadyAdmitted,
}

/// Storage contract of the dedup ledger.
///
/// All mutation goes through these atomic operations, so callers never need
/// their own locking.
pub trait ContentCache {
    async fn lookup(&self, identity: &Identity) -> Result<Option<CacheEntry>, CacheError>;

    /// Register a new identity with its provenance.
    async fn admit(
        &self,
        identity: &Identity,
        candidate: &CandidateArticle,
        at: DateTime<Utc>,
    ) -> Result<Admission, CacheError>;

    async fn mark_fetch(&self, identity: &Identity, status: FetchStatus) -> Result<(), CacheError>;

    /// Flip `fetch_status` to `fetched` and keep the payload for a later ingest retry.
    async fn store_fetched(&self, article: &FetchedArticle) -> Result<(), CacheError>;

    async fn mark_ingest(
        &self,
        identity: &Identity,
        status: IngestStatus,
    ) -> Result<(), CacheError>;

    /// Entries admitted by an earlier run that were never fetched.
    async fn pending_fetch(&self, limit: usize) -> Result<Vec<AdmittedCandidate>, CacheError>;

    /// Entries fetched by an earlier run whose ingest is still pending.
    async fn pending_ingest(&self, limit: usize) -> Result<Vec<FetchedArticle>, CacheError>;
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS article_cache (
    identity TEXT PRIMARY KEY NOT NULL,
    url TEXT NOT NULL,
    title TEXT NOT NULL,
    source_name TEXT NOT NULL,
    published_at TEXT,
    discovery_method TEXT NOT NULL,
    first_seen_at TEXT NOT NULL,
    fetch_status TEXT NOT NULL DEFAULT 'pending',
    ingest_status TEXT NOT NULL DEFAULT 'pending',
    page_title TEXT,
    body_text TEXT,
    http_status INTEGER,
    fetched_at TEXT,
    extracted_at TEXT,
    extraction_error TEXT
);
CREATE INDEX IF NOT EXISTS idx_article_cache_status
    ON article_cache (fetch_status, ingest_status);
"#;

const ENTRY_COLUMNS: &str = "identity, url, title, source_name, published_at, discovery_method, \
    first_seen_at, fetch_status, ingest_status, page_title, body_text, http_status, fetched_at, \
    extracted_at, extraction_error";

/// SQLite-backed [`ContentCache`].
#[derive(Debug, Clone)]
pub struct SqliteCache {
    pool: Pool<Sqlite>,
}

impl SqliteCache {
    #[instrument(level = "info", skip_all, fields(path = %path))]
    pub async fn open(path: &str) -> Result<Self, CacheError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let cache = Self { pool };
        cache.migrate().await?;
        info!("Article cache opened");
        Ok(cache)
    }

    /// Private in-memory ledger. Pinned to one connection so the database lives as long as the pool.
    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self, CacheError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let cache = Self { pool };
        cache.migrate().await?;
        Ok(cache)
    }

    async fn migrate(&self) -> Result<(), CacheError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    async fn fetch_entries(
        &self,
        where_clause: &str,
        limit: usize,
    ) -> Result<Vec<CacheEntry>, CacheError> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM article_cache WHERE {where_clause} \
             ORDER BY first_seen_at ASC LIMIT ?1"
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| row_to_entry(r).map(|(entry, _)| entry)).collect()
    }
}

/// Columns only needed to rebuild a [`FetchedArticle`].
struct FetchedPayload {
    page_title: Option<String>,
    body_text: Option<String>,
    http_status: Option<i64>,
    fetched_at: Option<DateTime<Utc>>,
}

fn row_to_entry(row: &SqliteRow) -> Result<(CacheEntry, FetchedPayload), CacheError> {
    let identity: String = row.try_get("identity")?;
    let corrupt = |reason: String| CacheError::Corrupt {
        identity: identity.clone(),
        reason,
    };

    let fetch_status = FetchStatus::from_str(&row.try_get::<String, _>("fetch_status")?)
        .map_err(corrupt)?;
    let ingest_status = IngestStatus::from_str(&row.try_get::<String, _>("ingest_status")?)
        .map_err(corrupt)?;
    let discovery_method = row
        .try_get::<String, _>("discovery_method")?
        .parse()
        .map_err(corrupt)?;

    let candidate = CandidateArticle {
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        published_at: row.try_get("published_at")?,
        source_name: row.try_get("source_name")?,
        discovery_method,
    };
    let entry = CacheEntry {
        identity: Identity::from_stored(identity.clone()),
        first_seen_at: row.try_get("first_seen_at")?,
        fetch_status,
        ingest_status,
        extracted_at: row.try_get("extracted_at")?,
        extraction_error: row.try_get("extraction_error")?,
        candidate,
    };
    let payload = FetchedPayload {
        page_title: row.try_get("page_title")?,
        body_text: row.try_get("body_text")?,
        http_status: row.try_get("http_status")?,
        fetched_at: row.try_get("fetched_at")?,
    };
    Ok((entry, payload))
}

impl ContentCache for SqliteCache {
    async fn lookup(&self, identity: &Identity) -> Result<Option<CacheEntry>, CacheError> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM article_cache WHERE identity = ?1");
        let row = sqlx::query(&sql)
            .bind(identity.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref()
            .map(|r| row_to_entry(r).map(|(entry, _)| entry))
            .transpose()
    }

    async fn admit(
        &self,
        identity: &Identity,
        candidate: &CandidateArticle,
        at: DateTime<Utc>,
    ) -> Result<Admission, CacheError> {
        let result = sqlx::query(
            r#"
            INSERT INTO article_cache
                (identity, url, title, source_name, published_at, discovery_method, first_seen_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(identity) DO NOTHING
            "#,
        )
        .bind(identity.as_str())
        .bind(&candidate.url)
        .bind(&candidate.title)
        .bind(&candidate.source_name)
        .bind(candidate.published_at)
        .bind(candidate.discovery_method.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;

        let admission = if result.rows_affected() == 1 {
            Admission::Admitted
        } else {
            Admission::AlreadyAdmitted
        };
        debug!(%identity, ?admission, "Admit");
        Ok(admission)
    }

    async fn mark_fetch(&self, identity: &Identity, status: FetchStatus) -> Result<(), CacheError> {
        let result = sqlx::query("UPDATE article_cache SET fetch_status = ?1 WHERE identity = ?2")
            .bind(status.as_str())
            .bind(identity.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CacheError::Missing(identity.to_string()));
        }
        Ok(())
    }

    async fn store_fetched(&self, article: &FetchedArticle) -> Result<(), CacheError> {
        let result = sqlx::query(
            r#"
            UPDATE article_cache
            SET fetch_status = ?1, page_title = ?2, body_text = ?3, http_status = ?4, fetched_at = ?5
            WHERE identity = ?6
            "#,
        )
        .bind(FetchStatus::Fetched.as_str())
        .bind(&article.title)
        .bind(&article.body_text)
        .bind(article.http_status as i64)
        .bind(article.fetched_at)
        .bind(article.identity.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CacheError::Missing(article.identity.to_string()));
        }
        Ok(())
    }

    async fn mark_ingest(
        &self,
        identity: &Identity,
        status: IngestStatus,
    ) -> Result<(), CacheError> {
        let result = sqlx::query("UPDATE article_cache SET ingest_status = ?1 WHERE identity = ?2")
            .bind(status.as_str())
            .bind(identity.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CacheError::Missing(identity.to_string()));
        }
        Ok(())
    }

    async fn pending_fetch(&self, limit: usize) -> Result<Vec<AdmittedCandidate>, CacheError> {
        let entries = self.fetch_entries("fetch_status = 'pending'", limit).await?;
        Ok(entries
            .into_iter()
            .map(|e| AdmittedCandidate {
                identity: e.identity,
                candidate: e.candidate,
            })
            .collect())
    }

    async fn pending_ingest(&self, limit: usize) -> Result<Vec<FetchedArticle>, CacheError> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM article_cache \
             WHERE fetch_status = 'fetched' AND ingest_status = 'pending' AND body_text IS NOT NULL \
             ORDER BY first_seen_at ASC LIMIT ?1"
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let (entry, payload) = row_to_entry(row)?;
            let http_status = payload
                .http_status
                .and_then(|s| u16::try_from(s).ok())
                .unwrap_or(200);
            out.push(FetchedArticle {
                title: payload
                    .page_title
                    .unwrap_or_else(|| entry.candidate.title.clone()),
                body_text: payload.body_text.unwrap_or_default(),
                fetched_at: payload.fetched_at.unwrap_or(entry.first_seen_at),
                http_status,
                identity: entry.identity,
                candidate: entry.candidate,
            });
        }
        Ok(out)
    }
}
