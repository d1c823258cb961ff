//! Syndication feed discovery.
//!
//! Each configured [`FeedSource`] is fetched and parsed independently. A
//! source that is unreachable or returns something that is not RSS/Atom
//! yields one warning and zero candidates; the other sources are unaffected.
//! Within a source, candidates keep the feed's own order.

use chrono::{DateTime, NaiveDateTime, Utc};
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use quick_xml::Reader;
use quick_xml::events::Event;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::borrow::Cow;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::{FeedSettings, FeedSource};
use crate::error::DiscoveryError;
use crate::models::{CandidateArticle, DiscoveryMethod};
use crate::utils::clean_text;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; AFLNewsBot/1.0)";

static NAMED_ENTITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"&([A-Za-z][A-Za-z0-9]*);").unwrap());

/// Transport for feed documents.
pub trait FeedClient {
    async fn fetch_feed(&self, source: &FeedSource) -> Result<String, DiscoveryError>;
}

/// [`FeedClient`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFeedClient {
    client: reqwest::Client,
}

impl HttpFeedClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

impl FeedClient for HttpFeedClient {
    async fn fetch_feed(&self, source: &FeedSource) -> Result<String, DiscoveryError> {
        let resp = self.client.get(&source.url).send().await?;
        let body = resp.error_for_status()?.text().await?;
        Ok(body)
    }
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    /// `<link>` plus any namespaced `<atom:link href=…/>` siblings.
    #[serde(rename = "link", default)]
    links: Vec<RssLink>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RssLink {
    #[serde(rename = "$text", default)]
    text: Option<String>,
    #[serde(rename = "@href", default)]
    href: Option<String>,
}

impl RssItem {
    /// First non-empty link, preferring element text over `href`.
    fn url(&self) -> Option<String> {
        self.links
            .iter()
            .filter_map(|l| l.text.as_deref())
            .chain(self.links.iter().filter_map(|l| l.href.as_deref()))
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<AtomText>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<AtomText>,
}

#[derive(Debug, Deserialize)]
struct AtomText {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

/// An item as it appears in the feed, before the relevance gate.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

enum FeedFormat {
    Rss,
    Atom,
}

fn detect_format(xml: &str) -> Result<FeedFormat, DiscoveryError> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return match e.local_name().as_ref() {
                    b"rss" => Ok(FeedFormat::Rss),
                    b"feed" => Ok(FeedFormat::Atom),
                    other => Err(DiscoveryError::Malformed(format!(
                        "unexpected root element <{}>",
                        String::from_utf8_lossy(other)
                    ))),
                };
            }
            Ok(Event::Eof) => return Err(DiscoveryError::Malformed("empty document".into())),
            Err(e) => return Err(DiscoveryError::Malformed(e.to_string())),
            _ => {}
        }
    }
}

/// Rewrite HTML named entities, which feeds leak into XML and XML parsers
/// reject, as literal text. The five XML entities are left alone and
/// unknown names become an escaped `&amp;name;`.
fn resolve_html_entities(xml: &str) -> Cow<'_, str> {
    NAMED_ENTITY.replace_all(xml, |caps: &Captures<'_>| {
        let (whole, name) = (&caps[0], &caps[1]);
        if matches!(name, "amp" | "lt" | "gt" | "quot" | "apos") {
            return whole.to_string();
        }
        let decoded = html_escape::decode_html_entities(whole);
        if decoded == whole {
            format!("&amp;{name};")
        } else {
            html_escape::encode_text(&decoded).into_owned()
        }
    })
}

/// Parse an RSS 2.0 or Atom document. Items without a link or title are skipped.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedItem>, DiscoveryError> {
    let xml = resolve_html_entities(xml);
    let items = match detect_format(&xml)? {
        FeedFormat::Rss => {
            let rss: Rss = quick_xml::de::from_str(&xml)
                .map_err(|e| DiscoveryError::Malformed(format!("rss: {e}")))?;
            rss.channel
                .items
                .into_iter()
                .filter_map(|it| {
                    let url = it.url()?;
                    let title = it.title.map(|t| clean_text(&t)).filter(|t| !t.is_empty())?;
                    Some(FeedItem {
                        url,
                        title,
                        description: it.description.map(|d| clean_text(&d)),
                        published_at: it.pub_date.as_deref().and_then(parse_published),
                    })
                })
                .collect()
        }
        FeedFormat::Atom => {
            let feed: AtomFeed = quick_xml::de::from_str(&xml)
                .map_err(|e| DiscoveryError::Malformed(format!("atom: {e}")))?;
            feed.entries
                .into_iter()
                .filter_map(|entry| {
                    let url = entry
                        .links
                        .iter()
                        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
                        .or(entry.links.first())
                        .and_then(|l| l.href.clone())?;
                    let title = entry
                        .title
                        .map(|t| clean_text(&t.value))
                        .filter(|t| !t.is_empty())?;
                    let published = entry.published.or(entry.updated);
                    Some(FeedItem {
                        url: url.trim().to_string(),
                        title,
                        description: entry.summary.map(|s| clean_text(&s.value)),
                        published_at: published.as_deref().and_then(parse_published),
                    })
                })
                .collect()
        }
    };
    Ok(items)
}

/// Parse the publish timestamps seen in the wild. Anything else is `None`.
pub fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%d %b %Y %H:%M:%S",
    ]
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
    .map(|naive| naive.and_utc())
}

/// Keep items whose title or description mentions a keyword. No keywords keeps everything.
pub fn is_relevant(item: &FeedItem, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let text = format!(
        "{} {}",
        item.title,
        item.description.as_deref().unwrap_or_default()
    )
    .to_lowercase();
    keywords.iter().any(|kw| text.contains(kw.as_str()))
}

/// Result of polling every configured source once.
#[derive(Debug, Default)]
pub struct FeedDiscovery {
    pub candidates: Vec<CandidateArticle>,
    /// One entry per failed source.
    pub warnings: Vec<String>,
}

/// Polls the fixed feed list with bounded parallelism.
#[derive(Debug)]
pub struct FeedDiscoverer<F> {
    client: F,
    settings: FeedSettings,
}

impl<F: FeedClient> FeedDiscoverer<F> {
    pub fn new(client: F, settings: FeedSettings) -> Self {
        Self { client, settings }
    }

    /// Poll one source: fetch with a timeout, parse, apply the relevance gate.
    #[instrument(level = "info", skip_all, fields(source = %source.source))]
    pub async fn poll(&self, source: &FeedSource) -> Result<Vec<CandidateArticle>, DiscoveryError> {
        let xml = tokio::time::timeout(self.settings.timeout, self.client.fetch_feed(source))
            .await
            .map_err(|_| DiscoveryError::Timeout(self.settings.timeout))??;

        let items = parse_feed(&xml)?;
        let total = items.len();
        let candidates: Vec<CandidateArticle> = items
            .into_iter()
            .filter(|item| is_relevant(item, &self.settings.keywords))
            .map(|item| CandidateArticle {
                url: item.url,
                title: item.title,
                published_at: item.published_at,
                source_name: source.source.clone(),
                discovery_method: DiscoveryMethod::Feed,
            })
            .collect();

        debug!(total, relevant = candidates.len(), "Parsed feed");
        Ok(candidates)
    }

    /// Poll every source, at most `concurrency` at a time, and fan the results back in.
    #[instrument(level = "info", skip_all, fields(sources = sources.len()))]
    pub async fn discover(&self, sources: &[FeedSource]) -> FeedDiscovery {
        let polls: Vec<(&FeedSource, Result<Vec<CandidateArticle>, DiscoveryError>)> =
            stream::iter(sources)
                .map(|source| async move { (source, self.poll(source).await) })
                .buffered(self.settings.concurrency.max(1))
                .collect()
                .await;

        let mut out = FeedDiscovery::default();
        for (source, result) in polls {
            match result {
                Ok(mut candidates) => {
                    info!(source = %source.source, count = candidates.len(), "Fetched feed");
                    out.candidates.append(&mut candidates);
                }
                Err(e) => {
                    warn!(source = %source.source, url = %source.url, error = %e, "Feed source failed");
                    out.warnings.push(format!("feed {}: {e}", source.source));
                }
            }
        }
        out
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    pub(crate) fn rss(items: &[(&str, &str)]) -> String {
        let body: String = items
            .iter()
            .map(|(title, link)| {
                format!(
                    "<item><title>{title}</title><link>{link}</link>\
                     <pubDate>Tue, 10 Jun 2025 04:00:00 GMT</pubDate>\
                     <description>AFL round report</description></item>"
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom"><channel>
<title>Feed</title><link>https://example.com</link>
<atom:link href="https://example.com/feed" rel="self"/>
{body}
</channel></rss>"#
        )
    }

    /// Serves canned documents keyed by feed URL. Missing keys are network failures.
    pub(crate) struct StubFeeds(pub HashMap<String, String>);

    impl FeedClient for StubFeeds {
        async fn fetch_feed(&self, source: &FeedSource) -> Result<String, DiscoveryError> {
            self.0
                .get(&source.url)
                .cloned()
                .ok_or_else(|| DiscoveryError::SourceUnavailable(format!("connect {}", source.url)))
        }
    }

    pub(crate) fn source(url: &str, name: &str) -> FeedSource {
        FeedSource {
            url: url.to_string(),
            source: name.to_string(),
            priority: 1,
        }
    }

    fn settings() -> FeedSettings {
        FeedSettings {
            sources: vec![],
            concurrency: 2,
            timeout: Duration::from_secs(5),
            keywords: vec!["afl".into(), "footy".into()],
        }
    }

    #[test]
    fn test_parse_rss_items_in_order() {
        let xml = rss(&[
            ("First AFL story", "https://a.com/1"),
            ("Second AFL story", "https://a.com/2"),
        ]);
        let items = parse_feed(&xml).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url, "https://a.com/1");
        assert_eq!(items[1].title, "Second AFL story");
        assert_eq!(
            items[0].published_at.unwrap().to_rfc3339(),
            "2025-06-10T04:00:00+00:00"
        );
    }

    #[test]
    fn test_parse_rss_with_cdata_entities_and_missing_links() {
        let xml = r#"<rss><channel>
<item><title><![CDATA[<b>Bont</b> stars]]></title><link> https://a.com/x </link><description>Footy&nbsp;news</description></item>
<item><title>No link here</title></item>
<item><link>https://a.com/no-title</link></item>
</channel></rss>"#;
        let items = parse_feed(xml).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Bont stars");
        assert_eq!(items[0].url, "https://a.com/x");
        assert_eq!(items[0].description.as_deref(), Some("Footy news"));
        assert!(items[0].published_at.is_none());
    }

    #[test]
    fn test_parse_rss_item_with_atom_link_sibling() {
        let xml = r#"<rss xmlns:atom="http://www.w3.org/2005/Atom"><channel>
<item><title>AFL x</title><link>https://a.com/1</link><atom:link href="https://a.com/other" rel="self"/></item>
<item><title>AFL y</title><atom:link href="https://a.com/2" rel="alternate"/></item>
</channel></rss>"#;
        let items = parse_feed(xml).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url, "https://a.com/1");
        assert_eq!(items[1].url, "https://a.com/2");
    }

    #[test]
    fn test_parse_rss_with_arbitrary_html_entities() {
        let xml = r#"<rss><channel>
<item><title>Pok&eacute;mon at the footy</title><link>https://a.com/p?a=1&amp;b=2</link><description>Tickets &pound;10 &lt;cheap&gt; &bogus;</description></item>
</channel></rss>"#;
        let items = parse_feed(xml).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Pokémon at the footy");
        assert_eq!(items[0].url, "https://a.com/p?a=1&b=2");
        assert_eq!(items[0].description.as_deref(), Some("Tickets £10 &bogus;"));
    }

    #[test]
    fn test_parse_atom() {
        let xml = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Club news</title>
  <entry>
    <title type="html">Trade period wrap</title>
    <link rel="self" href="https://club.com/self"/>
    <link rel="alternate" href="https://club.com/news/1"/>
    <updated>2025-06-10T10:00:00+10:00</updated>
    <summary>AFL trade news</summary>
  </entry>
</feed>"#;
        let items = parse_feed(xml).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url, "https://club.com/news/1");
        assert_eq!(items[0].title, "Trade period wrap");
        assert_eq!(
            items[0].published_at.unwrap().to_rfc3339(),
            "2025-06-10T00:00:00+00:00"
        );
    }

    #[test]
    fn test_malformed_documents() {
        assert!(matches!(parse_feed("<html><body>nope</body></html>"), Err(DiscoveryError::Malformed(_))));
        assert!(matches!(parse_feed(""), Err(DiscoveryError::Malformed(_))));
        assert!(matches!(parse_feed("<rss><channel><item>"), Err(DiscoveryError::Malformed(_))));
    }

    #[test]
    fn test_parse_published_formats() {
        assert!(parse_published("Tue, 10 Jun 2025 14:00:00 +1000").is_some());
        assert!(parse_published("2025-06-10T04:00:00Z").is_some());
        assert!(parse_published("2025-06-10T04:00:00.0000000").is_some());
        assert!(parse_published("2025-06-10 04:00:00").is_some());
        assert!(parse_published("10 Jun 2025 04:00:00").is_some());
        assert!(parse_published("yesterday").is_none());
    }

    #[test]
    fn test_relevance_gate() {
        let item = FeedItem {
            url: "https://a.com".into(),
            title: "Weather update".into(),
            description: Some("Rain expected at the footy".into()),
            published_at: None,
        };
        assert!(is_relevant(&item, &["footy".to_string()]));
        assert!(!is_relevant(&item, &["cricket".to_string()]));
        assert!(is_relevant(&item, &[]));
    }

    #[tokio::test]
    async fn test_failing_sources_do_not_hide_healthy_ones() {
        let mut docs = HashMap::new();
        docs.insert(
            "https://one.com/feed".to_string(),
            rss(&[("AFL one", "https://one.com/1"), ("AFL two", "https://one.com/2")]),
        );
        docs.insert("https://bad.com/feed".to_string(), "<<<not xml".to_string());
        docs.insert(
            "https://three.com/feed".to_string(),
            rss(&[("AFL three", "https://three.com/3")]),
        );
        let discoverer = FeedDiscoverer::new(StubFeeds(docs), settings());
        let sources = vec![
            source("https://one.com/feed", "One"),
            source("https://bad.com/feed", "Bad"),
            source("https://three.com/feed", "Three"),
            source("https://down.com/feed", "Down"),
        ];

        let found = discoverer.discover(&sources).await;
        assert_eq!(found.candidates.len(), 3);
        assert_eq!(found.warnings.len(), 2);
        assert!(found.candidates.iter().all(|c| c.discovery_method == DiscoveryMethod::Feed));
        assert_eq!(found.candidates[2].source_name, "Three");
    }

    /// Never answers within the feed timeout.
    struct HangingFeeds;

    impl FeedClient for HangingFeeds {
        async fn fetch_feed(&self, _source: &FeedSource) -> Result<String, DiscoveryError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(rss(&[("AFL late", "https://late.com/1")]))
        }
    }

    #[tokio::test]
    async fn test_poll_times_out_and_discover_reports_it() {
        let settings = FeedSettings {
            timeout: Duration::from_millis(30),
            ..settings()
        };
        let discoverer = FeedDiscoverer::new(HangingFeeds, settings);
        let hung = source("https://late.com/feed", "Late");

        let err = discoverer.poll(&hung).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Timeout(_)));

        let found = discoverer.discover(&[hung]).await;
        assert!(found.candidates.is_empty());
        assert_eq!(found.warnings.len(), 1);
        assert!(found.warnings[0].starts_with("feed Late:"));
    }

    #[tokio::test]
    async fn test_irrelevant_items_are_dropped() {
        let mut docs = HashMap::new();
        let xml = r#"<rss><channel>
<item><title>Cricket scores</title><link>https://x.com/1</link><description>Test match</description></item>
<item><title>AFL finals</title><link>https://x.com/2</link></item>
</channel></rss>"#;
        docs.insert("https://x.com/feed".to_string(), xml.to_string());
        let discoverer = FeedDiscoverer::new(StubFeeds(docs), settings());
        let found = discoverer.poll(&source("https://x.com/feed", "X")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].url, "https://x.com/2");
    }
}
