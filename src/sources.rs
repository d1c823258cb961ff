//! Static knowledge about AFL news outlets.
//!
//! | Table | Used by |
//! |-------|---------|
//! | [`NEWS_DOMAINS`] | backfill search result filtering and source naming |
//! | [`OFFICIAL_DOMAINS`] | `is_official_source` on ingest records |
//! | [`DEFAULT_KEYWORDS`] | feed relevance gate |

use url::Url;

/// Known news domains and their display names. Matching is by host suffix.
pub const NEWS_DOMAINS: &[(&str, &str)] = &[
    ("afl.com.au", "AFL.com.au"),
    ("foxsports.com.au", "Fox Sports"),
    ("sen.com.au", "SEN"),
    ("heraldsun.com.au", "Herald Sun"),
    ("theage.com.au", "The Age"),
    ("abc.net.au", "ABC News"),
    ("news.com.au", "News.com.au"),
    ("smh.com.au", "Sydney Morning Herald"),
    ("sportingnews.com", "Sporting News"),
    ("espn.com", "ESPN"),
    ("7news.com.au", "7 News"),
    ("9news.com.au", "9 News"),
    ("triplem.com.au", "Triple M"),
    ("zerohanger.com", "Zero Hanger"),
];

/// The league site plus every club site. All run on the same CMS.
pub const OFFICIAL_DOMAINS: &[&str] = &[
    "afl.com.au",
    "adelaidefc.com.au",
    "lions.com.au",
    "carltonfc.com.au",
    "collingwoodfc.com.au",
    "essendonfc.com.au",
    "fremantlefc.com.au",
    "geelongcats.com.au",
    "goldcoastfc.com.au",
    "gwsgiants.com.au",
    "hawthornfc.com.au",
    "melbournefc.com.au",
    "nmfc.com.au",
    "portadelaidefc.com.au",
    "richmondfc.com.au",
    "saints.com.au",
    "sydneyswans.com.au",
    "westcoasteagles.com.au",
    "westernbulldogs.com.au",
];

pub const DEFAULT_KEYWORDS: &[&str] = &[
    "afl", "footy", "football", "player", "coach", "club", "round", "match", "game", "injury",
    "trade", "draft", "premiership", "finals", "mcg", "marvel", "optus",
];

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// Display name for a known news domain.
pub fn news_source_name(url: &str) -> Option<&'static str> {
    let host = host_of(url)?;
    NEWS_DOMAINS
        .iter()
        .find(|(domain, _)| host_matches(&host, domain))
        .map(|(_, name)| *name)
}

pub fn is_official_url(url: &str) -> bool {
    host_of(url).is_some_and(|host| OFFICIAL_DOMAINS.iter().any(|d| host_matches(&host, d)))
}
