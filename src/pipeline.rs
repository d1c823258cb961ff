//! Run orchestration.
//!
//! One invocation walks a linear state machine:
//!
//! ```text
//! Idle → Discovering → Deduping → Fetching → Ingesting → Reporting → Idle
//! ```
//!
//! Each stage consumes the full output of the previous one. Per-item failures
//! become summary counters; only cache failures, a total ingest outage or
//! cancellation abort the run. A [`RunSummary`] is produced either way.

use chrono::Utc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::cache::ContentCache;
use crate::config::Config;
use crate::dedup::Deduplicator;
use crate::discovery::feeds::{FeedClient, FeedDiscoverer};
use crate::discovery::search::{BackfillDiscoverer, SearchProvider};
use crate::error::PipelineError;
use crate::fetch::{Fetcher, PageSource};
use crate::ingest::{IngestApi, Ingestor};
use crate::models::RunSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Discovering,
    Deduping,
    Fetching,
    Ingesting,
    Reporting,
}

pub struct Pipeline<'a, C, F, S, P, A> {
    config: &'a Config,
    cache: &'a C,
    feeds: FeedDiscoverer<F>,
    /// `None` when backfill search is disabled.
    search: Option<BackfillDiscoverer<S>>,
    fetcher: Fetcher<P>,
    ingestor: Ingestor<A>,
    state: RunState,
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

impl<'a, C, F, S, P, A> Pipeline<'a, C, F, S, P, A>
where
    C: ContentCache,
    F: FeedClient,
    S: SearchProvider,
    P: PageSource,
    A: IngestApi,
{
    pub fn new(
        config: &'a Config,
        cache: &'a C,
        feed_client: F,
        search_provider: S,
        page_source: P,
        ingest_api: A,
    ) -> Self {
        let search = config
            .search
            .enabled
            .then(|| BackfillDiscoverer::new(search_provider, config.search.clone()));
        Self {
            config,
            cache,
            feeds: FeedDiscoverer::new(feed_client, config.feeds.clone()),
            search,
            fetcher: Fetcher::new(page_source, config.fetch.clone()),
            ingestor: Ingestor::new(ingest_api, config.ingest.outage_threshold),
            state: RunState::Idle,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> RunState {
        self.state
    }

    fn enter(&mut self, next: RunState) {
        info!(from = ?self.state, to = ?next, "Run state");
        self.state = next;
    }

    /// Execute one full run. Never fails: aborts are reported in the summary.
    #[instrument(level = "info", skip_all)]
    pub async fn run(&mut self, cancel: &CancellationToken) -> RunSummary {
        let t0 = Instant::now();
        let mut summary = RunSummary {
            started_at: Some(Utc::now()),
            ..Default::default()
        };

        if let Err(e) = self.execute(&mut summary, cancel).await {
            error!(reason = e.reason(), error = %e, state = ?self.state, "Run aborted");
            summary.aborted = true;
            summary.abort_reason = Some(e.reason().to_string());
        }

        self.enter(RunState::Reporting);
        summary.duration = t0.elapsed();
        self.enter(RunState::Idle);
        summary
    }

    async fn execute(
        &mut self,
        summary: &mut RunSummary,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        checkpoint(cancel)?;

        // Leftovers from earlier runs, taken before this run admits anything
        let resume_fetch = self.cache.pending_fetch(self.config.resume_limit).await?;
        let resume_ingest = self.cache.pending_ingest(self.config.resume_limit).await?;

        self.enter(RunState::Discovering);
        let feed = self.feeds.discover(&self.config.feeds.sources).await;
        summary.discovered_feed = feed.candidates.len();
        summary.warnings.extend(feed.warnings);
        let mut candidates = feed.candidates;
        checkpoint(cancel)?;

        if let Some(search) = self.search.as_mut() {
            let backfill = search.backfill(&self.config.watch_list, cancel).await;
            summary.discovered_search = Some(backfill.candidates.len());
            summary.search_failures = backfill.failures.len();
            summary.warnings.extend(
                backfill
                    .failures
                    .iter()
                    .map(|(entity, e)| format!("search {entity}: {e}")),
            );
            summary.deferred_entities = backfill.deferred;
            candidates.extend(backfill.candidates);
        }
        checkpoint(cancel)?;

        self.enter(RunState::Deduping);
        let dedup = Deduplicator::new(self.cache).filter(candidates, cancel).await?;
        summary.rejected_invalid = dedup.stats.rejected_invalid;
        summary.already_seen = dedup.stats.already_seen;
        summary.collapsed = dedup.stats.collapsed;
        summary.admitted = dedup.stats.admitted;
        summary.warnings.extend(dedup.warnings);
        if dedup.cancelled {
            return Err(PipelineError::Cancelled);
        }

        self.enter(RunState::Fetching);
        summary.resumed_fetch = resume_fetch.len();
        let mut to_fetch = dedup.admitted;
        to_fetch.extend(resume_fetch);
        let fetched = self.fetcher.run(to_fetch, self.cache, cancel).await?;
        summary.fetched_ok = fetched.ok;
        summary.fetched_failed = fetched.failed;
        if fetched.cancelled {
            return Err(PipelineError::Cancelled);
        }

        self.enter(RunState::Ingesting);
        summary.resumed_ingest = resume_ingest.len();
        let mut to_ingest = fetched.fetched;
        to_ingest.extend(resume_ingest);
        let ingested = self.ingestor.run(to_ingest, self.cache, cancel).await?;
        summary.ingested_ok = ingested.ok;
        summary.ingest_duplicates = ingested.duplicates;
        summary.ingested_failed = ingested.failed;
        summary.ingest_deferred = ingested.deferred;
        if let Some(consecutive) = ingested.outage {
            return Err(PipelineError::IngestOutage(consecutive));
        }
        if ingested.cancelled {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }
}
