//! Command-line interface definitions.
//!
//! Every option can also be supplied through the environment variable named
//! in its `env` attribute, which is how the container deployment configures
//! the scraper. Values are read once at start-up and folded into an
//! immutable [`crate::config::Config`].

use clap::{ArgAction, Parser};

/// Command-line arguments for the AFL news scraper.
///
/// # Examples
///
/// ```sh
/// # One run against a local ingestion service
/// footy_news_scraper --api-base-url http://localhost:8787
///
/// # Feeds only, with a custom feed list and a JSON run summary
/// footy_news_scraper -c scraper.yaml --ddg-enabled false --summary-json ./runs/latest.json
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Base URL of the article ingestion service
    #[arg(long, env = "API_BASE_URL", default_value = "http://localhost:8787")]
    pub api_base_url: String,

    /// Path to the SQLite article cache
    #[arg(long, env = "CACHE_PATH", default_value = "article_cache.db")]
    pub cache_path: String,

    /// Optional YAML file with feeds, watch list and keywords
    #[arg(short, long, env = "CONFIG_PATH")]
    pub config: Option<String>,

    /// Run the search backfill stage
    #[arg(long, env = "DDG_ENABLED", default_value_t = true, action = ArgAction::Set)]
    pub ddg_enabled: bool,

    /// Maximum watch-list entities searched per run
    #[arg(long, env = "DDG_MAX_PLAYERS", default_value_t = 20)]
    pub ddg_max_players: usize,

    /// Minimum seconds between consecutive search calls
    #[arg(long, env = "DDG_DELAY_SECONDS", default_value_t = 2.0)]
    pub ddg_delay_seconds: f64,

    /// Per-request fetch timeout in seconds
    #[arg(long, env = "FETCH_TIMEOUT", default_value_t = 30)]
    pub fetch_timeout: u64,

    /// Minimum seconds between consecutive article fetches
    #[arg(long, env = "FETCH_DELAY_SECONDS", default_value_t = 1.0)]
    pub fetch_delay_seconds: f64,

    /// Feed sources polled concurrently
    #[arg(long, env = "FEED_CONCURRENCY", default_value_t = 4)]
    pub feed_concurrency: usize,

    /// Attempts per article when the ingestion service is unavailable
    #[arg(long, env = "INGEST_MAX_ATTEMPTS", default_value_t = 4)]
    pub ingest_max_attempts: usize,

    /// Entity domain requested from the ingestion service when no watch list is configured
    #[arg(long, env = "ENTITY_DOMAIN", default_value = "afl")]
    pub entity_domain: String,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Write the run summary as JSON to this path
    #[arg(long, env = "SUMMARY_JSON")]
    pub summary_json: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["footy_news_scraper"]);

        assert_eq!(cli.cache_path, "article_cache.db");
        assert!(cli.ddg_enabled);
        assert_eq!(cli.ddg_max_players, 20);
        assert_eq!(cli.fetch_timeout, 30);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from([
            "footy_news_scraper",
            "-c",
            "/etc/scraper.yaml",
            "--ddg-enabled",
            "false",
            "--fetch-delay-seconds",
            "0.5",
            "--summary-json",
            "/tmp/summary.json",
        ]);

        assert_eq!(cli.config.as_deref(), Some("/etc/scraper.yaml"));
        assert!(!cli.ddg_enabled);
        assert_eq!(cli.fetch_delay_seconds, 0.5);
        assert_eq!(cli.summary_json.as_deref(), Some("/tmp/summary.json"));
    }
}
