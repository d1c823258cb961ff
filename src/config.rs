//! Immutable run configuration.
//!
//! Built once in `main` from the [`Cli`] plus an optional YAML file, then
//! passed by reference to every stage. Nothing reads the environment after
//! this point.
//!
//! ```yaml
//! feeds:
//!   - url: https://www.afl.com.au/news/feed
//!     source: AFL.com.au
//!     priority: 1
//! watch_list:
//!   - name: Marcus Bontempelli
//!     priority_rank: 1
//! keywords: [afl, footy]
//! query_suffix: AFL news
//! ```

use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::cli::Cli;
use crate::error::ConfigError;
use crate::models::WatchEntity;
use crate::sources::DEFAULT_KEYWORDS;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8787";

/// A syndication feed polled on every run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedSource {
    pub url: String,
    pub source: String,
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_priority() -> u32 {
    99
}

pub fn default_feeds() -> Vec<FeedSource> {
    [
        ("https://www.afl.com.au/news/feed", "AFL.com.au", 1),
        ("https://www.foxsports.com.au/afl/rss", "Fox Sports", 1),
        ("https://www.heraldsun.com.au/sport/afl/rss", "Herald Sun", 1),
        ("https://www.theage.com.au/rss/sport/afl.xml", "The Age", 1),
        ("https://www.abc.net.au/news/feed/2942460/rss.xml", "ABC News", 2),
        ("https://www.sen.com.au/feed/", "SEN", 2),
    ]
    .into_iter()
    .map(|(url, source, priority)| FeedSource {
        url: url.to_string(),
        source: source.to_string(),
        priority,
    })
    .collect()
}

#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub sources: Vec<FeedSource>,
    pub concurrency: usize,
    pub timeout: Duration,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub enabled: bool,
    pub max_entities: usize,
    pub delay: Duration,
    pub timeout: Duration,
    pub max_results: usize,
    pub query_suffix: String,
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub timeout: Duration,
    pub delay: Duration,
    pub min_body_chars: usize,
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub endpoint: Url,
    pub timeout: Duration,
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive unavailable articles that count as a total outage.
    pub outage_threshold: usize,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub feeds: FeedSettings,
    pub search: SearchSettings,
    pub fetch: FetchSettings,
    pub ingest: IngestSettings,
    pub watch_list: Vec<WatchEntity>,
    pub entity_domain: String,
    pub cache_path: String,
    /// Upper bound on each resume backlog loaded at run start.
    pub resume_limit: usize,
    pub log_level: String,
    pub summary_json: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feeds: FeedSettings {
                sources: default_feeds(),
                concurrency: 4,
                timeout: Duration::from_secs(15),
                keywords: DEFAULT_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            },
            search: SearchSettings {
                enabled: true,
                max_entities: 20,
                delay: Duration::from_secs(2),
                timeout: Duration::from_secs(15),
                max_results: 10,
                query_suffix: "AFL news".to_string(),
            },
            fetch: FetchSettings {
                timeout: Duration::from_secs(30),
                delay: Duration::from_secs(1),
                min_body_chars: 100,
            },
            ingest: IngestSettings {
                endpoint: Url::parse(DEFAULT_API_BASE_URL).expect("static default url"),
                timeout: Duration::from_secs(30),
                max_attempts: 4,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(30),
                outage_threshold: 3,
            },
            watch_list: Vec::new(),
            entity_domain: "afl".to_string(),
            cache_path: "article_cache.db".to_string(),
            resume_limit: 50,
            log_level: "info".to_string(),
            summary_json: None,
        }
    }
}

/// Shape of the optional YAML file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    feeds: Option<Vec<FeedSource>>,
    watch_list: Option<Vec<WatchEntity>>,
    keywords: Option<Vec<String>>,
    query_suffix: Option<String>,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => load_file(path)?,
            None => FileConfig::default(),
        };

        let mut config = Config::default();

        config.ingest.endpoint = Url::parse(&cli.api_base_url).map_err(|e| ConfigError::Invalid {
            field: "api_base_url",
            reason: e.to_string(),
        })?;
        config.ingest.max_attempts = cli.ingest_max_attempts;
        config.search.enabled = cli.ddg_enabled;
        config.search.max_entities = cli.ddg_max_players;
        config.search.delay = seconds("ddg_delay_seconds", cli.ddg_delay_seconds)?;
        config.fetch.timeout = Duration::from_secs(cli.fetch_timeout);
        config.fetch.delay = seconds("fetch_delay_seconds", cli.fetch_delay_seconds)?;
        config.feeds.concurrency = cli.feed_concurrency;
        config.entity_domain = cli.entity_domain.clone();
        config.cache_path = cli.cache_path.clone();
        config.log_level = cli.log_level.clone();
        config.summary_json = cli.summary_json.clone();

        if let Some(feeds) = file.feeds {
            config.feeds.sources = feeds;
        }
        if let Some(watch_list) = file.watch_list {
            config.watch_list = watch_list;
        }
        if let Some(keywords) = file.keywords {
            config.feeds.keywords = keywords.into_iter().map(|k| k.to_lowercase()).collect();
        }
        if let Some(suffix) = file.query_suffix {
            config.search.query_suffix = suffix;
        }

        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Order feeds and the watch list by priority. Both sorts are stable.
    fn normalize(&mut self) {
        self.feeds.sources.sort_by_key(|f| f.priority);
        self.watch_list.sort_by_key(|e| e.priority_rank);
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.feeds.concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "feed_concurrency",
                reason: "must be at least 1".into(),
            });
        }
        if self.ingest.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "ingest_max_attempts",
                reason: "must be at least 1".into(),
            });
        }
        if !matches!(self.ingest.endpoint.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                field: "api_base_url",
                reason: format!("unsupported scheme {}", self.ingest.endpoint.scheme()),
            });
        }
        if self.fetch.timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "fetch_timeout",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}

fn load_file(path: &str) -> Result<FileConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_string(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_string(),
        source,
    })
}

fn seconds(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|e| ConfigError::Invalid {
        field,
        reason: e.to_string(),
    })
}
