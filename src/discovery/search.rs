//! Backfill search discovery.
//!
//! Feeds only carry the latest headlines, so each run also searches for the
//! highest-priority entities on the watch list. Calls are strictly sequential
//! with a minimum gap between them, and the number of entities searched per
//! run is capped; entities past the cap are deferred to the next run.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::SearchSettings;
use crate::discovery::feeds::parse_published;
use crate::error::DiscoveryError;
use crate::models::{CandidateArticle, DiscoveryMethod, WatchEntity};
use crate::sources::news_source_name;
use crate::throttle::Throttle;
use crate::utils::clean_text;

const DUCKDUCKGO_HTML: &str = "https://html.duckduckgo.com/html/";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

static RESULT_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a.result__a").unwrap());
static RESULT_TIMESTAMP: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".result__timestamp").unwrap());

/// One raw search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// External search backend.
pub trait SearchProvider {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, DiscoveryError>;
}

/// [`SearchProvider`] scraping the DuckDuckGo HTML endpoint.
#[derive(Debug, Clone)]
pub struct DuckDuckGoSearch {
    client: reqwest::Client,
    endpoint: String,
}

impl DuckDuckGoSearch {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            endpoint: DUCKDUCKGO_HTML.to_string(),
        })
    }
}

impl SearchProvider for DuckDuckGoSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, DiscoveryError> {
        let url = format!("{}?q={}", self.endpoint, urlencoding::encode(query));
        let html = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(parse_results(&html))
    }
}

/// Extract result links from a DuckDuckGo HTML results page.
///
/// News results carry a `.result__timestamp` inside their `.result` block;
/// it becomes `published_at` when it parses.
pub fn parse_results(html: &str) -> Vec<SearchHit> {
    let document = Html::parse_document(html);
    document
        .select(&RESULT_LINK)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let url = unwrap_redirect(href)?;
            let title = clean_text(&a.text().collect::<Vec<_>>().join(" "));
            Some(SearchHit {
                url,
                title,
                published_at: result_timestamp(a),
            })
        })
        .collect()
}

fn result_timestamp(link: ElementRef<'_>) -> Option<DateTime<Utc>> {
    let block = link
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().classes().any(|c| c == "result"))?;
    let raw = block.select(&RESULT_TIMESTAMP).next()?.text().collect::<String>();
    parse_published(&raw)
}

/// Result links are `//duckduckgo.com/l/?uddg=<target>`; return the target.
fn unwrap_redirect(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    let parsed = Url::parse(&absolute).ok()?;
    let is_redirect = parsed
        .host_str()
        .is_some_and(|h| h.ends_with("duckduckgo.com"))
        && parsed.path().starts_with("/l/");
    if is_redirect {
        parsed
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.into_owned())
    } else {
        Some(absolute)
    }
}

/// What one backfill pass produced.
#[derive(Debug, Default)]
pub struct BackfillOutcome {
    pub candidates: Vec<CandidateArticle>,
    pub searched: usize,
    /// `(entity, error)` for calls that failed; they count as zero results.
    pub failures: Vec<(String, String)>,
    /// Entities skipped because the per-run cap was reached.
    pub deferred: Vec<String>,
}

/// Sequential, throttled backfill over the watch list.
#[derive(Debug)]
pub struct BackfillDiscoverer<S> {
    provider: S,
    settings: SearchSettings,
    throttle: Throttle,
}

impl<S: SearchProvider> BackfillDiscoverer<S> {
    pub fn new(provider: S, settings: SearchSettings) -> Self {
        let throttle = Throttle::new(settings.delay);
        Self {
            provider,
            settings,
            throttle,
        }
    }

    /// Search one entity. Only known news domains survive.
    pub async fn search(&mut self, entity_name: &str) -> Result<Vec<CandidateArticle>, DiscoveryError> {
        let query = format!("{} {}", entity_name, self.settings.query_suffix);
        let timeout = self.settings.timeout;
        let hits = self
            .throttle
            .pace(tokio::time::timeout(timeout, self.provider.search(&query)))
            .await
            .map_err(|_| DiscoveryError::Timeout(timeout))??;

        let total = hits.len();
        let candidates: Vec<CandidateArticle> = hits
            .into_iter()
            .filter_map(|hit| {
                let source_name = news_source_name(&hit.url)?;
                Some(CandidateArticle {
                    url: hit.url,
                    title: hit.title,
                    published_at: hit.published_at,
                    source_name: source_name.to_string(),
                    discovery_method: DiscoveryMethod::Search,
                })
            })
            .unique_by(|c| c.url.clone())
            .take(self.settings.max_results)
            .collect();
        debug!(%query, total, kept = candidates.len(), "Search results");
        Ok(candidates)
    }

    /// Visit entities in priority order until the cap is hit. Stops early, between entities, on cancel.
    #[instrument(level = "info", skip_all, fields(entities = entities.len()))]
    pub async fn backfill(
        &mut self,
        entities: &[WatchEntity],
        cancel: &CancellationToken,
    ) -> BackfillOutcome {
        let mut out = BackfillOutcome::default();
        let ordered: Vec<&WatchEntity> = entities.iter().sorted_by_key(|e| e.priority_rank).collect();
        let cap = self.settings.max_entities;

        for (i, entity) in ordered.iter().enumerate() {
            if i >= cap {
                out.deferred = ordered[i..].iter().map(|e| e.name.clone()).collect();
                break;
            }
            if cancel.is_cancelled() {
                break;
            }
            out.searched += 1;
            match self.search(&entity.name).await {
                Ok(mut candidates) => {
                    info!(entity = %entity.name, count = candidates.len(), "Backfill search");
                    out.candidates.append(&mut candidates);
                }
                Err(e) => {
                    warn!(entity = %entity.name, error = %e, "Backfill search failed; treating as zero results");
                    out.failures.push((entity.name.clone(), e.to_string()));
                }
            }
        }

        if !out.deferred.is_empty() {
            info!(deferred = out.deferred.len(), "Search cap reached; deferring entities");
        }
        out
    }
}
