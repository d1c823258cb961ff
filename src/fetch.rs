//! Article fetching and body extraction.
//!
//! Fetches are sequential with a minimum gap between requests and a fixed
//! per-request timeout. Any failure is terminal for the article: it is marked
//! `fetch_failed` and never offered to the ingestor, in this run or later.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::ContentCache;
use crate::config::FetchSettings;
use crate::error::{CacheError, FetchError};
use crate::models::{AdmittedCandidate, FetchStatus, FetchedArticle};
use crate::throttle::Throttle;

const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

static OG_TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[property="og:title"]"#).unwrap());
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static PARAGRAPH: Lazy<Selector> = Lazy::new(|| Selector::parse("p").unwrap());
static TITLE_SITE_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+[|–—-]\s+[^|–—-]+$").unwrap());

/// Body containers used by the league, club and major news sites, most specific first.
static SITE_BODIES: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        "article-body",
        "story-body",
        "content-body",
        "story_body",
        "article__body",
        "article-text",
        "BodyBlock",
    ]
    .iter()
    .map(|class| Selector::parse(&format!(r#"[class*="{class}"]"#)).unwrap())
    .collect()
});

static GENERIC_BODIES: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        "article",
        r#"[class*="entry-content"]"#,
        r#"[class*="post-content"]"#,
        r#"[class*="article-content"]"#,
    ]
    .iter()
    .map(|s| Selector::parse(s).unwrap())
    .collect()
});

/// A raw HTTP response body.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub status: u16,
    pub body: String,
}

/// Anything that can retrieve a page. Non-2xx responses are errors.
pub trait PageSource {
    async fn get(&self, url: &str) -> Result<Page, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpPageSource {
    client: reqwest::Client,
}

impl HttpPageSource {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-AU,en;q=0.9"));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(BROWSER_UA)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }
}

impl PageSource for HttpPageSource {
    async fn get(&self, url: &str) -> Result<Page, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpError(status.as_u16()));
        }
        let body = response.text().await?;
        Ok(Page {
            status: status.as_u16(),
            body,
        })
    }
}

/// Title and body pulled out of an article page.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub title: Option<String>,
    pub body: String,
}

fn squash(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Paragraph text of a container, or its full text when it has no paragraphs.
fn container_text(el: ElementRef<'_>) -> String {
    let paragraphs: Vec<String> = el
        .select(&PARAGRAPH)
        .map(|p| squash(&p.text().collect::<String>()))
        .filter(|t| !t.is_empty())
        .collect();
    if paragraphs.is_empty() {
        squash(&el.text().collect::<String>())
    } else {
        paragraphs.join("\n\n")
    }
}

fn page_title(doc: &Html) -> Option<String> {
    let og = doc
        .select(&OG_TITLE)
        .next()
        .and_then(|m| m.value().attr("content"))
        .map(squash)
        .filter(|t| !t.is_empty());
    og.or_else(|| {
        let raw = squash(&doc.select(&TITLE).next()?.text().collect::<String>());
        let stripped = TITLE_SITE_SUFFIX.replace(&raw, "").trim().to_string();
        match (stripped.is_empty(), raw.is_empty()) {
            (false, _) => Some(stripped),
            (true, false) => Some(raw),
            (true, true) => None,
        }
    })
}

/// Pull the title and article body out of a page.
///
/// Body lookup order: site-specific containers, generic containers, then every
/// `<p>` on the page. The first candidate with at least `min_body_chars`
/// characters wins.
pub fn extract(html: &str, min_body_chars: usize) -> Result<Extracted, FetchError> {
    let doc = Html::parse_document(html);
    let long_enough = |t: &String| t.chars().count() >= min_body_chars;

    let body = SITE_BODIES
        .iter()
        .chain(GENERIC_BODIES.iter())
        .filter_map(|sel| doc.select(sel).next())
        .map(container_text)
        .find(long_enough)
        .or_else(|| {
            let all: Vec<String> = doc
                .select(&PARAGRAPH)
                .map(|p| squash(&p.text().collect::<String>()))
                .filter(|t| !t.is_empty())
                .collect();
            Some(all.join("\n\n")).filter(long_enough)
        })
        .ok_or(FetchError::EmptyBody)?;

    Ok(Extracted {
        title: page_title(&doc),
        body,
    })
}

/// Result of the fetch stage.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub fetched: Vec<FetchedArticle>,
    pub ok: usize,
    pub failed: usize,
    pub cancelled: bool,
}

pub struct Fetcher<P> {
    source: P,
    settings: FetchSettings,
    throttle: Throttle,
}

impl<P: PageSource> Fetcher<P> {
    pub fn new(source: P, settings: FetchSettings) -> Self {
        let throttle = Throttle::new(settings.delay);
        Self {
            source,
            settings,
            throttle,
        }
    }

    /// Fetch one admitted candidate. Does not touch the cache.
    pub async fn fetch(&mut self, item: &AdmittedCandidate) -> Result<FetchedArticle, FetchError> {
        let page = self
            .throttle
            .pace(tokio::time::timeout(self.settings.timeout, self.source.get(&item.candidate.url)))
            .await
            .map_err(|_| FetchError::Timeout)??;
        let extracted = extract(&page.body, self.settings.min_body_chars)?;
        debug!(
            identity = %item.identity,
            chars = extracted.body.chars().count(),
            "Extracted article body"
        );
        Ok(FetchedArticle {
            identity: item.identity.clone(),
            title: extracted.title.unwrap_or_else(|| item.candidate.title.clone()),
            candidate: item.candidate.clone(),
            body_text: extracted.body,
            fetched_at: Utc::now(),
            http_status: page.status,
        })
    }

    /// Fetch every item in order, recording the terminal fetch status of each.
    ///
    /// Per-article failures are counted; cache errors abort the stage.
    #[instrument(level = "info", skip_all, fields(items = items.len()))]
    pub async fn run<C: ContentCache>(
        &mut self,
        items: Vec<AdmittedCandidate>,
        cache: &C,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, CacheError> {
        let mut out = FetchOutcome::default();
        for item in items {
            if cancel.is_cancelled() {
                out.cancelled = true;
                break;
            }
            match self.fetch(&item).await {
                Ok(article) => {
                    cache.store_fetched(&article).await?;
                    out.ok += 1;
                    out.fetched.push(article);
                }
                Err(e) => {
                    warn!(identity = %item.identity, kind = e.kind(), error = %e, "Fetch failed");
                    cache.mark_fetch(&item.identity, FetchStatus::FetchFailed).await?;
                    out.failed += 1;
                }
            }
        }
        info!(ok = out.ok, failed = out.failed, "Fetch stage complete");
        Ok(out)
    }
}
