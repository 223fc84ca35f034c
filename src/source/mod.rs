// src/source/mod.rs
//! Tweet sources: synthetic generation and external search providers.
//!
//! Sources only produce `RawTweet`s. Classification, geolocation and scoring
//! happen in `TriageService::process`, and disaster filtering is left to callers.

pub mod search;
pub mod simulation;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::classify::DISASTER_KEYWORDS;
use crate::error::SourceError;
use crate::tweet::RawTweet;

pub use search::{ApiType, SearchSource};
pub use simulation::SimulationSource;

#[async_trait]
pub trait TweetSource: Send + Sync {
    /// Fetch at most `max_results` tweets for `query`.
    async fn fetch(&self, query: &str, max_results: usize) -> Result<Vec<RawTweet>, SourceError>;
}

/// Query used when the caller does not supply one: the first ten disaster keywords OR-ed.
pub fn default_query() -> String {
    DISASTER_KEYWORDS[..10].join(" OR ")
}

/// Normalize provider text: decode HTML entities, collapse whitespace, trim.
pub fn normalize_text(s: &str) -> String {
    static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

    let decoded = html_escape::decode_html_entities(s);
    let out = decoded
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    RE_WS.replace_all(&out, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_decodes_entities_and_collapses_ws() {
        let s = "  Flood&nbsp;warning &amp; evacuation\n\n ordered &gt; now ";
        assert_eq!(normalize_text(s), "Flood warning & evacuation ordered > now");
    }

    #[test]
    fn default_query_uses_first_ten_keywords() {
        let q = default_query();
        assert!(q.starts_with("earthquake OR fire OR flood"));
        assert!(q.ends_with("rescue"));
        assert_eq!(q.matches(" OR ").count(), 9);
    }
}
