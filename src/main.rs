//! # Footy News Scraper
//!
//! Discovers AFL news articles, drops anything already seen, fetches the full
//! text and hands each article to the downstream ingestion service.
//!
//! ## Usage
//!
//! ```sh
//! footy_news_scraper --api-base-url http://localhost:8787 --cache-path ./article_cache.db
//! ```
//!
//! ## Architecture
//!
//! One invocation is one run:
//! 1. **Discovering**: poll the syndication feeds, then backfill-search the watch list
//! 2. **Deduping**: admit each normalized URL into the SQLite cache at most once, ever
//! 3. **Fetching**: download and extract article bodies, one at a time
//! 4. **Ingesting**: submit each article to the ingestion API with retry
//! 5. **Reporting**: log the run summary, optionally write it as JSON, set the exit code

use clap::Parser;
use std::error::Error;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cache;
mod cli;
mod config;
mod dedup;
mod discovery;
mod error;
mod fetch;
mod identity;
mod ingest;
mod models;
mod pipeline;
mod report;
mod sources;
mod throttle;
mod utils;

use cache::SqliteCache;
use cli::Cli;
use config::Config;
use discovery::feeds::HttpFeedClient;
use discovery::search::DuckDuckGoSearch;
use error::PipelineError;
use fetch::HttpPageSource;
use ingest::{HttpIngestApi, RetryIngest};
use models::RunSummary;
use pipeline::Pipeline;

const WATCH_LIST_LIMIT: usize = 50;

#[tokio::main]
#[instrument]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    let args = Cli::parse();
    let mut config = Config::from_cli(&args)?;

    // --- Tracing init ---
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "footy_news_scraper starting up");
    debug!(?args, "Parsed CLI arguments");
    info!(
        feeds = config.feeds.sources.len(),
        watch_list = config.watch_list.len(),
        search_enabled = config.search.enabled,
        endpoint = %config.ingest.endpoint,
        "Loaded configuration"
    );

    let ingest_api = HttpIngestApi::new(&config.ingest.endpoint, config.ingest.timeout)?;

    if config.search.enabled && config.watch_list.is_empty() {
        match ingest_api
            .watch_entities(&config.entity_domain, WATCH_LIST_LIMIT)
            .await
        {
            Ok(entities) => {
                info!(count = entities.len(), "Loaded watch list from ingestion service");
                config.watch_list = entities;
            }
            Err(e) => warn!(error = %e, "Could not load watch list; backfill search will be empty"),
        }
    }
    let config = config;

    let summary = match SqliteCache::open(&config.cache_path).await {
        Ok(cache) => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received; finishing the current item then stopping");
                    on_signal.cancel();
                }
            });

            let mut pipeline = Pipeline::new(
                &config,
                &cache,
                HttpFeedClient::new(config.feeds.timeout)?,
                DuckDuckGoSearch::new(config.search.timeout)?,
                HttpPageSource::new(config.fetch.timeout)?,
                RetryIngest::new(ingest_api, &config.ingest),
            );
            pipeline.run(&cancel).await
        }
        Err(e) => {
            error!(
                path = %config.cache_path,
                retryable = e.is_retryable(),
                error = %e,
                "Could not open article cache"
            );
            let e = PipelineError::from(e);
            RunSummary {
                started_at: Some(chrono::Utc::now()),
                aborted: true,
                abort_reason: Some(e.reason().to_string()),
                ..Default::default()
            }
        }
    };

    report::log_summary(&summary);
    if let Some(path) = &config.summary_json {
        if let Err(e) = report::write_summary(&summary, path).await {
            error!(path = %path, error = %e, "Failed to write run summary");
        }
    }

    info!(
        elapsed_ms = summary.duration.as_millis() as u64,
        aborted = summary.aborted,
        "Execution complete"
    );
    Ok(report::exit_code(&summary))
}
