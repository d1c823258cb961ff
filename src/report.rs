//! Run summary reporting.
//!
//! The summary is always logged as one structured line. When a path is
//! configured it is also written as pretty JSON for whatever schedules the
//! scraper (cron, CI) to pick up.

use std::error::Error;
use std::process::ExitCode;
use tokio::fs;
use tracing::{error, info, instrument, warn};

use crate::models::RunSummary;
use crate::utils::ensure_parent_writable;

pub fn log_summary(summary: &RunSummary) {
    let search = summary
        .discovered_search
        .map_or_else(|| "disabled".to_string(), |n| n.to_string());
    info!(
        discovered_feed = summary.discovered_feed,
        discovered_search = %search,
        rejected_invalid = summary.rejected_invalid,
        already_seen = summary.already_seen,
        collapsed = summary.collapsed,
        admitted = summary.admitted,
        resumed_fetch = summary.resumed_fetch,
        fetched_ok = summary.fetched_ok,
        fetched_failed = summary.fetched_failed,
        resumed_ingest = summary.resumed_ingest,
        ingested_ok = summary.ingested_ok,
        ingest_duplicates = summary.ingest_duplicates,
        ingested_failed = summary.ingested_failed,
        ingest_deferred = summary.ingest_deferred,
        search_failures = summary.search_failures,
        deferred_entities = summary.deferred_entities.len(),
        warnings = summary.warnings.len(),
        duration_ms = summary.duration.as_millis() as u64,
        aborted = summary.aborted,
        abort_reason = summary.abort_reason.as_deref().unwrap_or(""),
        "Run summary"
    );
    for w in &summary.warnings {
        warn!(warning = %w, "Run warning");
    }
}

/// Write the summary as pretty JSON, creating the parent directory if needed.
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn write_summary(summary: &RunSummary, path: &str) -> Result<(), Box<dyn Error>> {
    let json = serde_json::to_string_pretty(summary)?;
    if let Err(e) = ensure_parent_writable(path).await {
        error!(error = %e, "Summary directory is not writable");
        return Err(e);
    }
    fs::write(path, json).await?;
    info!("Wrote run summary");
    Ok(())
}

/// `1` when the run aborted or failures outnumber successful ingests.
pub fn exit_code(summary: &RunSummary) -> ExitCode {
    if summary.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_summary_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/summary.json");
        let summary = RunSummary {
            discovered_feed: 3,
            admitted: 1,
            ingested_ok: 1,
            deferred_entities: vec!["Tom Stewart".into()],
            ..Default::default()
        };

        write_summary(&summary, path.to_str().unwrap()).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\n  \"discovered_feed\": 3"));
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["deferred_entities"][0], "Tom Stewart");
        assert_eq!(value["aborted"], false);
    }

    #[test]
    fn test_exit_code_rules() {
        let clean = RunSummary {
            ingested_ok: 2,
            fetched_failed: 2,
            ..Default::default()
        };
        assert!(!clean.is_failure());

        let noisy = RunSummary {
            ingested_ok: 1,
            fetched_failed: 2,
            ..Default::default()
        };
        assert!(noisy.is_failure());

        let aborted = RunSummary {
            aborted: true,
            abort_reason: Some("cancelled".into()),
            ..Default::default()
        };
        assert!(aborted.is_failure());
    }
}
