//! Data models flowing through the discovery → dedup → fetch → ingest pipeline.
//!
//! - [`CandidateArticle`]: a discovered article reference, not yet checked against the cache
//! - [`AdmittedCandidate`]: a candidate registered in the cache ledger under its [`Identity`]
//! - [`FetchedArticle`]: an admitted candidate with its full body text
//! - [`CacheEntry`]: the ledger row owned by the content cache
//! - [`IngestRecord`]: the payload shape accepted by the ingestion service
//! - [`RunSummary`]: aggregate counters reported once per invocation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::identity::Identity;

/// How a candidate was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    Feed,
    Search,
}

impl DiscoveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryMethod::Feed => "feed",
            DiscoveryMethod::Search => "search",
        }
    }
}

impl FromStr for DiscoveryMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "feed" => Ok(DiscoveryMethod::Feed),
            "search" => Ok(DiscoveryMethod::Search),
            other => Err(format!("unknown discovery method: {other}")),
        }
    }
}

/// A discovered article reference.
///
/// Immutable once produced by a discoverer. Its identity is the normalized
/// form of `url`, computed by the deduplicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateArticle {
    pub url: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source_name: String,
    pub discovery_method: DiscoveryMethod,
}

/// A candidate that passed dedup and owns a cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmittedCandidate {
    pub identity: Identity,
    pub candidate: CandidateArticle,
}

/// Fetch state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Pending,
    Fetched,
    FetchFailed,
}

/// Ingest state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Pending,
    Ingested,
    IngestFailed,
}

macro_rules! status_strings {
    ($ty:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $s,)+
                }
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok($ty::$variant),)+
                    other => Err(format!(concat!("unknown ", stringify!($ty), ": {}"), other)),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

status_strings!(FetchStatus {
    Pending => "pending",
    Fetched => "fetched",
    FetchFailed => "fetch_failed",
});

status_strings!(IngestStatus {
    Pending => "pending",
    Ingested => "ingested",
    IngestFailed => "ingest_failed",
});

/// One row of the dedup ledger.
///
/// `extracted_at` and `extraction_error` belong to the downstream extraction
/// service; this pipeline only ever reads them.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub identity: Identity,
    pub first_seen_at: DateTime<Utc>,
    pub fetch_status: FetchStatus,
    pub ingest_status: IngestStatus,
    pub extracted_at: Option<DateTime<Utc>>,
    pub extraction_error: Option<String>,
    pub candidate: CandidateArticle,
}

/// An admitted candidate with its full text.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedArticle {
    pub identity: Identity,
    pub candidate: CandidateArticle,
    /// Page title when the page provided one, otherwise the discovered title.
    pub title: String,
    pub body_text: String,
    pub fetched_at: DateTime<Utc>,
    pub http_status: u16,
}

/// Payload accepted by `POST /articles/ingest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRecord {
    pub url: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source_name: String,
    pub body_text: String,
    pub is_official_source: bool,
}

impl IngestRecord {
    pub fn from_fetched(article: &FetchedArticle) -> Self {
        Self {
            url: article.candidate.url.clone(),
            title: article.title.clone(),
            published_at: article.candidate.published_at,
            source_name: article.candidate.source_name.clone(),
            body_text: article.body_text.clone(),
            is_official_source: crate::sources::is_official_url(&article.candidate.url),
        }
    }
}

/// A watch-list entry driving backfill search order. Lower rank = searched first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEntity {
    pub name: String,
    #[serde(default)]
    pub priority_rank: u32,
}

/// Aggregate counters for a single pipeline invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub started_at: Option<DateTime<Utc>>,
    pub discovered_feed: usize,
    /// `None` when backfill search is disabled by configuration.
    pub discovered_search: Option<usize>,
    pub rejected_invalid: usize,
    pub already_seen: usize,
    /// Same-run duplicates that collapsed into an earlier admission.
    pub collapsed: usize,
    pub admitted: usize,
    pub resumed_fetch: usize,
    pub fetched_ok: usize,
    pub fetched_failed: usize,
    pub resumed_ingest: usize,
    pub ingested_ok: usize,
    pub ingest_duplicates: usize,
    pub ingested_failed: usize,
    /// Articles left with `ingest_status = pending` after an unavailable ingest.
    pub ingest_deferred: usize,
    pub search_failures: usize,
    pub deferred_entities: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub aborted: bool,
    pub abort_reason: Option<String>,
}

impl RunSummary {
    pub fn discovered(&self) -> usize {
        self.discovered_feed + self.discovered_search.unwrap_or(0)
    }

    pub fn failures(&self) -> usize {
        self.fetched_failed + self.ingested_failed + self.ingest_deferred
    }

    /// Whether the process should exit non-zero for this run.
    pub fn is_failure(&self) -> bool {
        self.aborted || self.failures() > self.ingested_ok
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(url: &str) -> CandidateArticle {
        CandidateArticle {
            url: url.to_string(),
            title: "Title".to_string(),
            published_at: None,
            source_name: "AFL.com.au".to_string(),
            discovery_method: DiscoveryMethod::Feed,
        }
    }

    #[test]
    fn test_status_round_trip_through_strings() {
        assert_eq!("fetch_failed".parse::<FetchStatus>(), Ok(FetchStatus::FetchFailed));
        assert_eq!(IngestStatus::Ingested.as_str(), "ingested");
        assert!("bogus".parse::<IngestStatus>().is_err());
        assert_eq!("search".parse::<DiscoveryMethod>(), Ok(DiscoveryMethod::Search));
    }

    #[test]
    fn test_ingest_record_flags_official_sources() {
        let article = FetchedArticle {
            identity: Identity::parse("https://www.afl.com.au/news/123456/slug").unwrap(),
            candidate: candidate("https://www.afl.com.au/news/123456/slug"),
            title: "Page title".to_string(),
            body_text: "Body".to_string(),
            fetched_at: Utc::now(),
            http_status: 200,
        };
        let record = IngestRecord::from_fetched(&article);
        assert!(record.is_official_source);
        assert_eq!(record.title, "Page title");

        let json = serde_json::to_value(&record).unwrap();
        for key in ["url", "title", "published_at", "source_name", "body_text", "is_official_source"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_run_summary_totals() {
        let summary = RunSummary {
            discovered_feed: 2,
            discovered_search: Some(1),
            fetched_failed: 1,
            ingested_ok: 1,
            ..Default::default()
        };
        assert_eq!(summary.discovered(), 3);
        assert!(!summary.is_failure());

        let disabled = RunSummary { discovered_feed: 4, ..Default::default() };
        assert_eq!(disabled.discovered_search, None);
        assert_eq!(disabled.discovered(), 4);
    }

    #[test]
    fn test_run_summary_serializes_duration_as_millis() {
        let summary = RunSummary {
            duration: Duration::from_millis(1500),
            ..Default::default()
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["duration"], 1500);
        assert_eq!(json["discovered_search"], serde_json::Value::Null);
    }
}
