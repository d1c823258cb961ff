//! Candidate discovery.
//!
//! Two independent sources produce [`CandidateArticle`](crate::models::CandidateArticle)s:
//!
//! | Source | Module | Method | Notes |
//! |--------|--------|--------|-------|
//! | Syndication feeds | [`feeds`] | RSS 2.0 / Atom | Polled concurrently, one failure never hides another source |
//! | Backfill search | [`search`] | DuckDuckGo HTML | Sequential, throttled, capped per run |
//!
//! Neither source keeps a cursor: every run re-polls from scratch and relies
//! on the content cache to drop what it has already seen.

pub mod feeds;
pub mod search;
