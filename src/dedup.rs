//! Dedup filter between discovery and fetch.
//!
//! Every candidate is reduced to its [`Identity`] and checked against the
//! content cache. Only the first admission of an identity, ever, passes
//! through. Invalid URLs are dropped with a warning; cache failures abort.

use chrono::Utc;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::{Admission, ContentCache};
use crate::error::CacheError;
use crate::identity::Identity;
use crate::models::{AdmittedCandidate, CandidateArticle};
use crate::utils::truncate_for_log;

/// Counters produced by one dedup pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DedupStats {
    pub rejected_invalid: usize,
    pub already_seen: usize,
    pub collapsed: usize,
    pub admitted: usize,
}

#[derive(Debug, Default)]
pub struct DedupOutcome {
    pub admitted: Vec<AdmittedCandidate>,
    pub stats: DedupStats,
    pub warnings: Vec<String>,
    pub cancelled: bool,
}

/// What happened to one candidate.
#[derive(Debug)]
pub enum Decision {
    Admitted(AdmittedCandidate),
    /// Present in the ledger before this pass began.
    AlreadySeen,
    /// Same identity as a candidate admitted earlier in this pass.
    Collapsed,
    Invalid(String),
}

pub struct Deduplicator<'a, C> {
    cache: &'a C,
}

impl<'a, C: ContentCache> Deduplicator<'a, C> {
    pub fn new(cache: &'a C) -> Self {
        Self { cache }
    }

    /// Decide one candidate. `admitted_now` holds identities admitted earlier in the same pass.
    pub async fn decide(
        &self,
        candidate: CandidateArticle,
        admitted_now: &HashSet<Identity>,
    ) -> Result<Decision, CacheError> {
        let identity = match Identity::parse(&candidate.url) {
            Ok(identity) => identity,
            Err(e) => {
                return Ok(Decision::Invalid(format!(
                    "invalid url {}: {e}",
                    truncate_for_log(&candidate.url, 120)
                )));
            }
        };

        if self.cache.lookup(&identity).await?.is_some() {
            if admitted_now.contains(&identity) {
                debug!(%identity, url = %candidate.url, "Collapsed into earlier admission");
                return Ok(Decision::Collapsed);
            }
            debug!(%identity, "Already in cache");
            return Ok(Decision::AlreadySeen);
        }

        match self.cache.admit(&identity, &candidate, Utc::now()).await? {
            Admission::Admitted => Ok(Decision::Admitted(AdmittedCandidate {
                identity,
                candidate,
            })),
            // Lost the race to a concurrent admit of the same identity
            Admission::AlreadyAdmitted => Ok(Decision::Collapsed),
        }
    }

    /// Filter a batch in order. Stops at the first cache error or on cancel.
    #[instrument(level = "info", skip_all, fields(candidates = candidates.len()))]
    pub async fn filter(
        &self,
        candidates: Vec<CandidateArticle>,
        cancel: &CancellationToken,
    ) -> Result<DedupOutcome, CacheError> {
        let mut out = DedupOutcome::default();
        let mut admitted_now = HashSet::new();
        for candidate in candidates {
            if cancel.is_cancelled() {
                out.cancelled = true;
                break;
            }
            match self.decide(candidate, &admitted_now).await? {
                Decision::Admitted(admitted) => {
                    out.stats.admitted += 1;
                    admitted_now.insert(admitted.identity.clone());
                    out.admitted.push(admitted);
                }
                Decision::AlreadySeen => out.stats.already_seen += 1,
                Decision::Collapsed => out.stats.collapsed += 1,
                Decision::Invalid(warning) => {
                    warn!("{warning}");
                    out.stats.rejected_invalid += 1;
                    out.warnings.push(warning);
                }
            }
        }
        info!(
            admitted = out.stats.admitted,
            already_seen = out.stats.already_seen,
            collapsed = out.stats.collapsed,
            rejected_invalid = out.stats.rejected_invalid,
            "Dedup complete"
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SqliteCache;
    use crate::models::DiscoveryMethod;

    fn candidate(url: &str, method: DiscoveryMethod) -> CandidateArticle {
        CandidateArticle {
            url: url.to_string(),
            title: "Daicos best on ground".to_string(),
            published_at: None,
            source_name: "Fox Sports".to_string(),
            discovery_method: method,
        }
    }

    #[tokio::test]
    async fn test_same_article_from_feed_and_search_admitted_once() {
        let cache = SqliteCache::open_in_memory().await.unwrap();
        let dedup = Deduplicator::new(&cache);
        let batch = vec![
            candidate("https://www.foxsports.com.au/afl/daicos?utm_source=rss", DiscoveryMethod::Feed),
            candidate("http://foxsports.com.au/afl/daicos/", DiscoveryMethod::Search),
        ];
        let out = dedup.filter(batch, &CancellationToken::new()).await.unwrap();

        assert_eq!(out.admitted.len(), 1);
        assert_eq!(out.admitted[0].candidate.discovery_method, DiscoveryMethod::Feed);
        assert_eq!(out.stats.admitted, 1);
        assert_eq!(out.stats.collapsed, 1);
        assert_eq!(out.stats.already_seen, 0);
    }

    #[tokio::test]
    async fn test_second_run_sees_nothing_new() {
        let cache = SqliteCache::open_in_memory().await.unwrap();
        let dedup = Deduplicator::new(&cache);
        let batch = vec![candidate("https://www.sen.com.au/news/x", DiscoveryMethod::Feed)];

        let first = dedup.filter(batch.clone(), &CancellationToken::new()).await.unwrap();
        assert_eq!(first.stats.admitted, 1);

        let second = dedup.filter(batch, &CancellationToken::new()).await.unwrap();
        assert!(second.admitted.is_empty());
        assert_eq!(second.stats.already_seen, 1);
    }

    #[tokio::test]
    async fn test_invalid_urls_are_dropped_with_warning() {
        let cache = SqliteCache::open_in_memory().await.unwrap();
        let dedup = Deduplicator::new(&cache);
        let batch = vec![
            candidate("not a url", DiscoveryMethod::Feed),
            candidate("ftp://afl.com.au/file", DiscoveryMethod::Search),
            candidate("https://www.afl.com.au/news/1", DiscoveryMethod::Feed),
        ];
        let out = dedup.filter(batch, &CancellationToken::new()).await.unwrap();

        assert_eq!(out.stats.rejected_invalid, 2);
        assert_eq!(out.warnings.len(), 2);
        assert_eq!(out.admitted.len(), 1);
    }
}
