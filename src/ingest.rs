//! Hand-off to the downstream ingestion service.
//!
//! Records are submitted one at a time so one bad article never blocks the
//! rest. Retry with exponential backoff lives in the [`RetryIngest`]
//! decorator; the [`Ingestor`] decides terminal cache status and detects a
//! total outage.
//!
//! # Retry Strategy
//!
//! - `max_attempts` total attempts (4 by default)
//! - Exponential backoff starting at 1 second, capped at 30 seconds
//! - Random jitter (0-250ms) added to each delay
//! - Only `unavailable` errors are retried; `rejected` returns immediately

use rand::{Rng, rng};
use serde::Deserialize;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::cache::ContentCache;
use crate::config::IngestSettings;
use crate::error::{CacheError, IngestError};
use crate::models::{FetchedArticle, IngestRecord, IngestStatus, WatchEntity};
use crate::utils::truncate_for_log;

/// Acknowledgement body returned by `POST /articles/ingest`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IngestAck {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub article_id: Option<serde_json::Value>,
}

impl IngestAck {
    /// The service already held this article.
    pub fn is_duplicate(&self) -> bool {
        self.status.as_deref() == Some("duplicate")
    }
}

/// Downstream ingestion contract: one record per call.
pub trait IngestApi {
    async fn submit(&self, record: &IngestRecord) -> Result<IngestAck, IngestError>;
}

#[derive(Debug, Deserialize)]
struct EntityList {
    #[serde(default)]
    entities: Vec<EntityRow>,
}

#[derive(Debug, Deserialize)]
struct EntityRow {
    name: String,
}

/// JSON-over-HTTP client for the ingestion service.
#[derive(Debug, Clone)]
pub struct HttpIngestApi {
    client: reqwest::Client,
    base: String,
}

impl HttpIngestApi {
    pub fn new(endpoint: &Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base: endpoint.as_str().trim_end_matches('/').to_string(),
        })
    }

    /// Watch list served by the service, in its own priority order.
    #[instrument(level = "info", skip(self))]
    pub async fn watch_entities(
        &self,
        domain: &str,
        limit: usize,
    ) -> Result<Vec<WatchEntity>, IngestError> {
        let limit = limit.to_string();
        let response = self
            .client
            .get(format!("{}/entities", self.base))
            .query(&[
                ("domain", domain),
                ("entity_type", "player"),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::from_status(status.as_u16(), truncate_for_log(&body, 200)));
        }
        let list: EntityList = response.json().await?;
        Ok(list
            .entities
            .into_iter()
            .zip(1u32..)
            .map(|(row, rank)| WatchEntity {
                name: row.name,
                priority_rank: rank,
            })
            .collect())
    }
}

impl IngestApi for HttpIngestApi {
    async fn submit(&self, record: &IngestRecord) -> Result<IngestAck, IngestError> {
        let response = self
            .client
            .post(format!("{}/articles/ingest", self.base))
            .json(record)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(IngestError::from_status(status.as_u16(), truncate_for_log(&body, 200)));
        }
        // A 2xx without a JSON body still means stored
        Ok(serde_json::from_str(&body).unwrap_or_default())
    }
}

/// Decorator adding exponential backoff retry to any [`IngestApi`].
///
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..=jitter)
/// ```
pub struct RetryIngest<T> {
    inner: T,
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Duration,
    jitter: Duration,
}

impl<T: IngestApi> RetryIngest<T> {
    pub fn new(inner: T, settings: &IngestSettings) -> Self {
        Self {
            inner,
            max_attempts: settings.max_attempts.max(1),
            base_delay: settings.base_delay,
            max_delay: settings.max_delay,
            jitter: Duration::from_millis(250),
        }
    }

    #[cfg(test)]
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=self.jitter.as_millis() as u64);
        delay + Duration::from_millis(jitter_ms)
    }
}

impl<T> fmt::Debug for RetryIngest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryIngest")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T: IngestApi> IngestApi for RetryIngest<T> {
    async fn submit(&self, record: &IngestRecord) -> Result<IngestAck, IngestError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            match self.inner.submit(record).await {
                Ok(ack) => return Ok(ack),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    let total_dt = total_t0.elapsed();
                    if attempt >= self.max_attempts {
                        error!(
                            url = %record.url,
                            attempt,
                            max = self.max_attempts,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "submit() exhausted retries"
                        );
                        return Err(e);
                    }
                    let delay = self.backoff(attempt);
                    warn!(
                        url = %record.url,
                        attempt,
                        max = self.max_attempts,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "submit() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Result of the ingest stage.
#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub ok: usize,
    pub duplicates: usize,
    pub failed: usize,
    /// Left `pending` after the service stayed unavailable.
    pub deferred: usize,
    /// Consecutive unavailable count when the stage gave up, if it did.
    pub outage: Option<usize>,
    pub cancelled: bool,
}

pub struct Ingestor<A> {
    api: A,
    outage_threshold: usize,
}

impl<A: IngestApi> Ingestor<A> {
    pub fn new(api: A, outage_threshold: usize) -> Self {
        Self {
            api,
            outage_threshold,
        }
    }

    /// Submit every article in order and record its terminal ingest status.
    ///
    /// `rejected` marks `ingest_failed`. `unavailable` (after retries) leaves
    /// the entry `pending` for a later run. Once `outage_threshold` articles in
    /// a row come back `unavailable`, the stage stops and the remaining
    /// articles stay `pending` too, however many succeeded before.
    #[instrument(level = "info", skip_all, fields(items = items.len()))]
    pub async fn run<C: ContentCache>(
        &self,
        items: Vec<FetchedArticle>,
        cache: &C,
        cancel: &CancellationToken,
    ) -> Result<IngestOutcome, CacheError> {
        let mut out = IngestOutcome::default();
        let mut consecutive_unavailable = 0usize;
        let total = items.len();

        for (i, article) in items.into_iter().enumerate() {
            if cancel.is_cancelled() {
                out.cancelled = true;
                break;
            }
            let record = IngestRecord::from_fetched(&article);
            match self.api.submit(&record).await {
                Ok(ack) => {
                    cache.mark_ingest(&article.identity, IngestStatus::Ingested).await?;
                    out.ok += 1;
                    if ack.is_duplicate() {
                        out.duplicates += 1;
                    }
                    consecutive_unavailable = 0;
                    debug!(identity = %article.identity, article_id = ?ack.article_id, "Ingested");
                }
                Err(e @ IngestError::Rejected { .. }) => {
                    warn!(identity = %article.identity, kind = "rejected", error = %e, "Ingest rejected");
                    cache.mark_ingest(&article.identity, IngestStatus::IngestFailed).await?;
                    out.failed += 1;
                    consecutive_unavailable = 0;
                }
                Err(e @ IngestError::Unavailable(_)) => {
                    warn!(identity = %article.identity, kind = "unavailable", error = %e, "Ingest deferred to next run");
                    out.deferred += 1;
                    consecutive_unavailable += 1;
                    if consecutive_unavailable >= self.outage_threshold {
                        let remaining = total - i - 1;
                        error!(consecutive_unavailable, remaining, "Ingestion service unreachable; stopping stage");
                        out.deferred += remaining;
                        out.outage = Some(consecutive_unavailable);
                        break;
                    }
                }
            }
        }

        info!(
            ok = out.ok,
            duplicates = out.duplicates,
            failed = out.failed,
            deferred = out.deferred,
            "Ingest stage complete"
        );
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted ingestion service. Every call is recorded by URL.
    #[derive(Default)]
    pub(crate) struct StubIngest {
        pub down: bool,
        /// Calls answered normally before the service goes down for good.
        pub healthy_calls: Option<usize>,
        /// Unavailable answers served before the service recovers.
        pub transient_failures: AtomicUsize,
        pub rejected: Vec<String>,
        pub duplicates: Vec<String>,
        pub calls: Mutex<Vec<String>>,
    }

    impl StubIngest {
        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl IngestApi for StubIngest {
        async fn submit(&self, record: &IngestRecord) -> Result<IngestAck, IngestError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(record.url.clone());
                calls.len()
            };
            if self.down || self.healthy_calls.is_some_and(|n| call > n) {
                return Err(IngestError::Unavailable("connection refused".into()));
            }
            if self
                .transient_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(IngestError::from_status(503, "warming up".into()));
            }
            if self.rejected.contains(&record.url) {
                return Err(IngestError::from_status(422, "body_text too short".into()));
            }
            let status = if self.duplicates.contains(&record.url) {
                "duplicate"
            } else {
                "created"
            };
            Ok(IngestAck {
                status: Some(status.to_string()),
                article_id: Some(serde_json::json!(7)),
            })
        }
    }

    impl<T: IngestApi> IngestApi for &T {
        async fn submit(&self, record: &IngestRecord) -> Result<IngestAck, IngestError> {
            (**self).submit(record).await
        }
    }

    pub(crate) fn fast_settings() -> IngestSettings {
        IngestSettings {
            endpoint: Url::parse("http://localhost:8787").unwrap(),
            timeout: Duration::from_secs(5),
            max_attempts: 4,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            outage_threshold: 3,
        }
    }

    fn record(url: &str) -> IngestRecord {
        IngestRecord {
            url: url.to_string(),
            title: "t".into(),
            published_at: None,
            source_name: "SEN".into(),
            body_text: "b".into(),
            is_official_source: false,
        }
    }

    #[test]
    fn test_ack_duplicate_detection() {
        let ack: IngestAck = serde_json::from_str(r#"{"status":"duplicate","article_id":12}"#).unwrap();
        assert!(ack.is_duplicate());
        let ack: IngestAck = serde_json::from_str("{}").unwrap();
        assert!(!ack.is_duplicate());
    }

    #[test]
    fn test_backoff_is_capped() {
        let settings = IngestSettings {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            ..fast_settings()
        };
        let retry = RetryIngest::new(StubIngest::default(), &settings).with_jitter(Duration::ZERO);
        assert_eq!(retry.backoff(1), Duration::from_secs(1));
        assert_eq!(retry.backoff(3), Duration::from_secs(4));
        assert_eq!(retry.backoff(10), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_outage() {
        let stub = StubIngest {
            transient_failures: AtomicUsize::new(2),
            ..Default::default()
        };
        let retry = RetryIngest::new(&stub, &fast_settings()).with_jitter(Duration::ZERO);
        let ack = retry.submit(&record("https://sen.com.au/a")).await.unwrap();
        assert_eq!(ack.status.as_deref(), Some("created"));
        assert_eq!(stub.call_count(), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let stub = StubIngest {
            down: true,
            ..Default::default()
        };
        let retry = RetryIngest::new(&stub, &fast_settings()).with_jitter(Duration::ZERO);
        let err = retry.submit(&record("https://sen.com.au/a")).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(stub.call_count(), 4);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let stub = StubIngest {
            rejected: vec!["https://sen.com.au/bad".into()],
            ..Default::default()
        };
        let retry = RetryIngest::new(&stub, &fast_settings()).with_jitter(Duration::ZERO);
        let err = retry.submit(&record("https://sen.com.au/bad")).await.unwrap_err();
        assert!(matches!(err, IngestError::Rejected { status: 422, .. }));
        assert_eq!(stub.call_count(), 1);
    }
}
