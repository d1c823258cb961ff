//! Text and file system helpers shared by the stages.

use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<[^>]+>").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Truncate a string for logging purposes.
///
/// Long strings are cut at `max` bytes (backed off to a char boundary) with
/// `"…(+N bytes)"` appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Strip tags, decode entities and collapse whitespace.
pub fn clean_text(s: &str) -> String {
    let without_tags = TAGS.replace_all(s, " ");
    let decoded = html_escape::decode_html_entities(&without_tags);
    WHITESPACE.replace_all(&decoded, " ").trim().to_string()
}

/// Ensure the directory that will hold `file_path` exists and is writable.
///
/// Creates missing directories, then writes and removes a probe file.
#[instrument(level = "info", skip_all, fields(path = %file_path))]
pub async fn ensure_parent_writable(file_path: &str) -> Result<(), Box<dyn Error>> {
    let dir = match Path::new(file_path).parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };
    fs::create_dir_all(&dir).await?;
    // Sync probe keeps the error surface simple
    let probe_path = dir.join("..__probe_write__");
    stdfs::File::create(&probe_path)?;
    let _ = stdfs::remove_file(&probe_path);
    info!(dir = %dir.display(), "Directory is writable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log_short_string() {
        assert_eq!(truncate_for_log("Hello, world!", 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundaries() {
        let s = "ééééé";
        let result = truncate_for_log(s, 3);
        assert!(result.starts_with('é'));
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(
            clean_text("  <b>Bont</b>&nbsp;kicks   <i>five</i> &amp; wins\n"),
            "Bont kicks five & wins"
        );
        assert_eq!(clean_text(""), "");
    }

    #[tokio::test]
    async fn test_ensure_parent_writable_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/deeper/summary.json");
        ensure_parent_writable(target.to_str().unwrap()).await.unwrap();
        assert!(dir.path().join("nested/deeper").is_dir());
    }
}
