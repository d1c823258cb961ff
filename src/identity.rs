//! Canonical article identity used as the dedup key.
//!
//! Syndicated feed links and search-indexed links to the same story usually
//! differ only in scheme, host casing, a `www.` prefix, tracking parameters or
//! a trailing slash. [`Identity::parse`] folds all of those away.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;

/// Query parameters that never change the article being addressed.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "mc_cid", "mc_eid", "ocid", "cmpid", "sr_share", "ref",
    "ref_src", "igshid", "_ga",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("unparseable url {url:?}: {reason}")]
    Unparseable { url: String, reason: String },
    #[error("unsupported scheme in {0:?}")]
    UnsupportedScheme(String),
}

/// Normalized URL string. Two candidates share an identity iff they address the same article.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let mut url = Url::parse(raw.trim()).map_err(|e| IdentityError::Unparseable {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "http" | "https" => {}
            _ => return Err(IdentityError::UnsupportedScheme(raw.to_string())),
        }
        // http -> https between two special schemes always succeeds
        let _ = url.set_scheme("https");

        if let Some(host) = url.host_str().map(str::to_string) {
            if let Some(bare) = host.strip_prefix("www.") {
                url.set_host(Some(bare)).map_err(|e| IdentityError::Unparseable {
                    url: raw.to_string(),
                    reason: e.to_string(),
                })?;
            }
        }
        if url.port() == Some(443) {
            let _ = url.set_port(None);
        }

        url.set_fragment(None);

        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !is_tracking_param(k))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }

        let path = url.path().to_string();
        if path.len() > 1 && path.ends_with('/') {
            url.set_path(path.trim_end_matches('/'));
        }

        Ok(Identity(url.to_string()))
    }

    /// Wrap an identity read back from storage.
    pub fn from_stored(s: String) -> Self {
        Identity(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}
