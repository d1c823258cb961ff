//! Error taxonomy for the pipeline.
//!
//! Per-item errors ([`DiscoveryError`], [`FetchError`], [`IngestError`]) are
//! caught at their stage boundary and turned into summary counters.
//! Resource-class errors ([`CacheError`], a total ingest outage) surface as a
//! [`PipelineError`] and abort the run.

use thiserror::Error;

/// The dedup ledger could not be read or written.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache storage unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
    #[error("no cache entry for {0}")]
    Missing(String),
    #[error("corrupt cache row for {identity}: {reason}")]
    Corrupt { identity: String, reason: String },
}

impl CacheError {
    /// Storage errors are worth retrying on a later run; corrupt rows are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::Unavailable(_))
    }
}

/// A feed source or the search provider could not produce candidates.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for DiscoveryError {
    fn from(e: reqwest::Error) -> Self {
        DiscoveryError::SourceUnavailable(e.to_string())
    }
}

/// Terminal fetch outcome for one article.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("timed out")]
    Timeout,
    #[error("http status {0}")]
    HttpError(u16),
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("no substantial article body")]
    EmptyBody,
}

impl FetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout => "timeout",
            FetchError::HttpError(_) => "http_error",
            FetchError::NetworkError(_) => "network_error",
            FetchError::EmptyBody => "empty_body",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = e.status() {
            FetchError::HttpError(status.as_u16())
        } else {
            FetchError::NetworkError(e.to_string())
        }
    }
}

/// Ingestion service failure for one record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IngestError {
    /// Downstream validation failure. Never retried.
    #[error("rejected by ingestion service (status {status}): {message}")]
    Rejected { status: u16, message: String },
    /// Downstream unreachable or overloaded.
    #[error("ingestion service unavailable: {0}")]
    Unavailable(String),
}

impl IngestError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::Unavailable(_))
    }

    /// Classify an HTTP status from the ingestion service.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            408 | 429 => IngestError::Unavailable(format!("status {status}: {message}")),
            400..=499 => IngestError::Rejected { status, message },
            _ => IngestError::Unavailable(format!("status {status}: {message}")),
        }
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => IngestError::from_status(status.as_u16(), e.to_string()),
            None => IngestError::Unavailable(e.to_string()),
        }
    }
}

/// Invalid startup configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Run-level failure: the orchestrator stops and reports an aborted summary.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    CacheUnavailable(#[from] CacheError),
    #[error("ingestion service unreachable for {0} consecutive articles")]
    IngestOutage(usize),
    #[error("run cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Short machine-readable reason recorded in the run summary.
    pub fn reason(&self) -> &'static str {
        match self {
            PipelineError::CacheUnavailable(_) => "cache_unavailable",
            PipelineError::IngestOutage(_) => "ingest_outage",
            PipelineError::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_status_classification() {
        assert!(matches!(
            IngestError::from_status(422, "bad".into()),
            IngestError::Rejected { status: 422, .. }
        ));
        assert!(IngestError::from_status(503, "down".into()).is_retryable());
        assert!(IngestError::from_status(429, "slow down".into()).is_retryable());
        assert!(!IngestError::from_status(400, "bad".into()).is_retryable());
    }

    #[test]
    fn test_fetch_error_kinds() {
        assert_eq!(FetchError::HttpError(404).kind(), "http_error");
        assert_eq!(FetchError::EmptyBody.kind(), "empty_body");
        assert_eq!(FetchError::Timeout.to_string(), "timed out");
    }

    #[test]
    fn test_pipeline_error_reasons() {
        assert_eq!(PipelineError::Cancelled.reason(), "cancelled");
        assert_eq!(PipelineError::IngestOutage(3).reason(), "ingest_outage");
        let cache = CacheError::Corrupt {
            identity: "x".into(),
            reason: "bad status".into(),
        };
        assert!(!cache.is_retryable());
        assert_eq!(PipelineError::from(cache).reason(), "cache_unavailable");
    }
}
