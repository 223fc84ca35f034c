// src/tweet.rs
//! Tweet shapes shared by every stage of the triage pipeline.
//!
//! `RawTweet` is what a source hands over before classification;
//! `TweetRecord` is the immutable result after classify → geolocate → score.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::ClassificationMethod;

/// A latitude/longitude pair, serialized as `[lat, lon]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    /// Build a pair, rejecting values outside the valid lat/lon ranges.
    pub fn checked(lat: f64, lon: f64) -> Option<Self> {
        let valid = lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon);
        valid.then_some(Self { lat, lon })
    }
}

impl From<[f64; 2]> for Coordinates {
    fn from([lat, lon]: [f64; 2]) -> Self {
        Self { lat, lon }
    }
}

impl From<Coordinates> for [f64; 2] {
    fn from(c: Coordinates) -> Self {
        [c.lat, c.lon]
    }
}

/// How a record entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TweetOrigin {
    Stream,
    Search,
    Manual,
}

/// Which backend produced the raw tweet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Simulation,
    OfficialApi,
    TwitterapiIo,
    /// Posted directly to the ingest endpoint.
    Caller,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicMetrics {
    #[serde(default)]
    pub retweet_count: u64,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub reply_count: u64,
    #[serde(default)]
    pub quote_count: u64,
}

/// Provider-neutral tweet before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTweet {
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub author_id: Option<String>,
    /// Free-text location (place name or author profile location).
    pub location: Option<String>,
    /// Coordinates already known from the provider (point geo, place bbox, simulation table).
    pub coordinates: Option<Coordinates>,
    pub public_metrics: PublicMetrics,
    pub lang: String,
    pub user_verified: bool,
    pub provider: Provider,
}

impl RawTweet {
    pub fn simulated(&self) -> bool {
        self.provider == Provider::Simulation
    }
}

/// Result of processing one input text. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TweetRecord {
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    pub is_disaster: bool,
    pub confidence: f32,
    pub priority_score: f32,
    pub classification_method: ClassificationMethod,
    pub source: TweetOrigin,
    pub provider: Provider,
    pub simulated: bool,
    #[serde(default)]
    pub public_metrics: PublicMetrics,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default)]
    pub user_verified: bool,
}

fn default_lang() -> String {
    "en".to_string()
}

/// A tweet posted by a client for ingestion; only `text` is required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmittedTweet {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl SubmittedTweet {
    /// `None` for blank text. Missing ids become `manual_<unix>_<index>`.
    pub fn into_raw(self, index: usize) -> Option<RawTweet> {
        let text = self.text.filter(|t| !t.trim().is_empty())?;
        let created_at = crate::source::search::parse_timestamp(self.created_at.as_deref());
        Some(RawTweet {
            id: self
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("manual_{}_{index}", Utc::now().timestamp())),
            text,
            created_at,
            author_id: Some(self.author_id.unwrap_or_else(|| "manual".to_string())),
            location: self.location.filter(|l| !l.trim().is_empty()),
            coordinates: None,
            public_metrics: PublicMetrics::default(),
            lang: "en".to_string(),
            user_verified: false,
            provider: Provider::Caller,
        })
    }
}
