// src/source/search.rs
//! External recent-search client (official API v2 or the twitterapi.io relay).
//!
//! Both providers speak the v2 query parameters. Replies come back either as a
//! v2 envelope (`data` + `includes.users/places`) or as a flat list where each
//! tweet embeds its author; both are normalized into `RawTweet`.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{normalize_text, TweetSource};
use crate::error::SourceError;
use crate::geo::bbox_center;
use crate::tweet::{Coordinates, Provider, PublicMetrics, RawTweet};

const OFFICIAL_URL: &str = "https://api.twitter.com/2/tweets/search/recent";
const TWITTERAPI_IO_URL: &str = "https://api.twitterapi.io/v2/tweets/search/recent";
/// Providers reject `max_results` below this.
const MIN_PAGE: usize = 10;
const ERROR_BODY_PREVIEW: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiType {
    Official,
    TwitterapiIo,
}

impl ApiType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiType::Official => "official",
            ApiType::TwitterapiIo => "twitterapi_io",
        }
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            ApiType::Official => OFFICIAL_URL,
            ApiType::TwitterapiIo => TWITTERAPI_IO_URL,
        }
    }

    pub fn provider(&self) -> Provider {
        match self {
            ApiType::Official => Provider::OfficialApi,
            ApiType::TwitterapiIo => Provider::TwitterapiIo,
        }
    }

    /// Provider-specific query decoration.
    pub fn decorate_query(&self, query: &str) -> String {
        match self {
            ApiType::Official => format!("({query}) lang:en -is:retweet"),
            ApiType::TwitterapiIo => format!("{query} lang:en"),
        }
    }

    /// Metered cost in dollars for `tweets` returned tweets.
    pub fn cost_for(&self, tweets: usize) -> f64 {
        match self {
            ApiType::Official => 0.0,
            ApiType::TwitterapiIo => tweets as f64 / 1000.0 * 0.15,
        }
    }
}

impl FromStr for ApiType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "official" => Ok(ApiType::Official),
            "twitterapi_io" | "twitterapi.io" | "twitterapiio" => Ok(ApiType::TwitterapiIo),
            other => Err(format!("unknown api type: {other}")),
        }
    }
}

pub struct SearchSource {
    api_type: ApiType,
    token: String,
    endpoint: String,
    max_results_cap: usize,
    http: reqwest::Client,
}

impl SearchSource {
    pub fn new(
        api_type: ApiType,
        token: impl Into<String>,
        timeout: Duration,
        max_results_cap: usize,
    ) -> Result<Self, SourceError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(SourceError::MissingCredentials(api_type.as_str()));
        }
        let http = reqwest::Client::builder()
            .user_agent("disaster-tweet-triage/0.1")
            .connect_timeout(Duration::from_secs(5).min(timeout))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            api_type,
            token,
            endpoint: api_type.endpoint().to_string(),
            max_results_cap: max_results_cap.max(MIN_PAGE),
            http,
        })
    }

    /// Point the client at another endpoint (proxy, local stub).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl TweetSource for SearchSource {
    async fn fetch(&self, query: &str, max_results: usize) -> Result<Vec<RawTweet>, SourceError> {
        let t0 = Instant::now();
        let page = max_results.clamp(MIN_PAGE, self.max_results_cap);
        let decorated = self.api_type.decorate_query(query);
        let page_param = page.to_string();

        let resp = self
            .http
            .get(&self.endpoint)
            .bearer_auth(&self.token)
            .query(&[
                ("query", decorated.as_str()),
                ("max_results", page_param.as_str()),
                ("tweet.fields", "created_at,author_id,public_metrics,geo,lang"),
                ("user.fields", "location,verified"),
                ("expansions", "author_id,geo.place_id"),
                ("place.fields", "full_name,country,geo"),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 429 {
            let reset = resp
                .headers()
                .get("x-rate-limit-reset")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<i64>().ok());
            return Err(SourceError::RateLimited { reset });
        }
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                message: body.chars().take(ERROR_BODY_PREVIEW).collect(),
            });
        }

        let mut tweets = parse_search_response(self.api_type.provider(), &body)?;
        tweets.truncate(max_results);

        histogram!("search_latency_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        debug!(
            target: "search",
            api = self.api_type.as_str(),
            returned = tweets.len(),
            "search page received"
        );
        Ok(tweets)
    }
}

/// Ids arrive as strings from v2 and sometimes as bare numbers from relays.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Text(String),
    Number(u64),
}

impl IdRepr {
    fn key(&self) -> String {
        match self {
            IdRepr::Text(s) => s.clone(),
            IdRepr::Number(n) => n.to_string(),
        }
    }

    fn into_string(self) -> String {
        match self {
            IdRepr::Text(s) => s,
            IdRepr::Number(n) => n.to_string(),
        }
    }
}

/// Top-level keys that identify a v2 envelope (data, empty result or problem).
const V2_KEYS: [&str; 5] = ["data", "meta", "errors", "title", "detail"];

#[derive(Debug)]
enum SearchPayload {
    /// Flat list; each tweet carries its own author object.
    Flat(FlatPage),
    /// v2 envelope with expansions in `includes`.
    V2(V2Page),
}

impl SearchPayload {
    /// Pick the dialect from the top-level keys, then decode it strictly:
    /// a `tweets` list must be a valid flat page, anything else must look like v2.
    fn decode(body: &str) -> Result<Self, SourceError> {
        let value: serde_json::Value = serde_json::from_str(body)?;
        let Some(obj) = value.as_object() else {
            return Err(SourceError::Payload("search reply is not a JSON object".into()));
        };
        if obj.contains_key("tweets") {
            return Ok(SearchPayload::Flat(serde_json::from_value(value)?));
        }
        if !V2_KEYS.iter().any(|k| obj.contains_key(*k)) {
            let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
            keys.truncate(5);
            return Err(SourceError::Payload(format!(
                "unrecognized search reply (keys: {})",
                keys.join(", ")
            )));
        }
        Ok(SearchPayload::V2(serde_json::from_value(value)?))
    }
}

#[derive(Debug, Deserialize)]
struct V2Page {
    #[serde(default)]
    data: Option<Vec<V2Tweet>>,
    #[serde(default)]
    includes: V2Includes,
    #[serde(default)]
    errors: Vec<ProblemItem>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProblemItem {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct V2Includes {
    #[serde(default)]
    users: Vec<V2User>,
    #[serde(default)]
    places: Vec<V2Place>,
}

#[derive(Debug, Deserialize)]
struct V2Tweet {
    id: IdRepr,
    text: String,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    author_id: Option<IdRepr>,
    #[serde(default)]
    geo: Option<V2Geo>,
    #[serde(default)]
    public_metrics: Option<PublicMetrics>,
    #[serde(default)]
    lang: Option<String>,
}

#[derive(Debug, Deserialize)]
struct V2Geo {
    #[serde(default)]
    place_id: Option<String>,
    #[serde(default)]
    coordinates: Option<PointGeo>,
}

/// GeoJSON point: `[lon, lat]`.
#[derive(Debug, Deserialize)]
struct PointGeo {
    #[serde(default)]
    coordinates: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct V2User {
    id: IdRepr,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    verified: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct V2Place {
    id: String,
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    geo: Option<PlaceGeo>,
}

#[derive(Debug, Deserialize)]
struct PlaceGeo {
    #[serde(default)]
    bbox: Option<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
struct FlatPage {
    tweets: Vec<FlatTweet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlatTweet {
    id: IdRepr,
    text: String,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    lang: Option<String>,
    #[serde(default)]
    retweet_count: u64,
    #[serde(default)]
    like_count: u64,
    #[serde(default)]
    reply_count: u64,
    #[serde(default)]
    quote_count: u64,
    #[serde(default)]
    author: Option<FlatAuthor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlatAuthor {
    id: IdRepr,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    is_blue_verified: bool,
}

/// Parse one search reply body into provider-neutral tweets.
///
/// A reply without `data` but with `errors`/`title` is a provider failure;
/// a v2 reply with only `meta` (or `{"tweets": []}`) is a legitimate empty result.
/// Anything that fits neither dialect is `SourceError::Payload`.
pub fn parse_search_response(provider: Provider, body: &str) -> Result<Vec<RawTweet>, SourceError> {
    let payload = SearchPayload::decode(body)?;
    let mut out = match payload {
        SearchPayload::Flat(page) => normalize_flat(provider, page),
        SearchPayload::V2(page) => normalize_v2(provider, page)?,
    };
    out.retain(|t| !t.text.is_empty());
    Ok(out)
}

fn normalize_v2(provider: Provider, page: V2Page) -> Result<Vec<RawTweet>, SourceError> {
    let Some(data) = page.data else {
        if let Some(problem) = problem_message(&page) {
            return Err(SourceError::Payload(problem));
        }
        return Ok(Vec::new());
    };
    if !page.errors.is_empty() {
        warn!(target: "search", partial_errors = page.errors.len(), "search page has partial errors");
    }

    let users: HashMap<String, &V2User> = page
        .includes
        .users
        .iter()
        .map(|u| (u.id.key(), u))
        .collect();
    let places: HashMap<&str, &V2Place> = page
        .includes
        .places
        .iter()
        .map(|p| (p.id.as_str(), p))
        .collect();

    let out = data
        .into_iter()
        .map(|t| {
            let author_id = t.author_id.map(IdRepr::into_string);
            let user = author_id.as_deref().and_then(|id| users.get(id).copied());
            let place = t
                .geo
                .as_ref()
                .and_then(|g| g.place_id.as_deref())
                .and_then(|pid| places.get(pid).copied());

            let point = t
                .geo
                .as_ref()
                .and_then(|g| g.coordinates.as_ref())
                .and_then(|p| match p.coordinates.as_slice() {
                    [lon, lat] => Coordinates::checked(*lat, *lon),
                    _ => None,
                });
            let bbox = place
                .and_then(|p| p.geo.as_ref())
                .and_then(|g| g.bbox.as_deref())
                .and_then(bbox_center);

            let location = place
                .and_then(|p| p.full_name.clone())
                .or_else(|| user.and_then(|u| u.location.clone()))
                .map(|l| normalize_text(&l))
                .filter(|l| !l.is_empty());

            RawTweet {
                id: t.id.into_string(),
                text: normalize_text(&t.text),
                created_at: parse_timestamp(t.created_at.as_deref()),
                author_id,
                location,
                coordinates: point.or(bbox),
                public_metrics: t.public_metrics.unwrap_or_default(),
                lang: t.lang.unwrap_or_else(|| "en".to_string()),
                user_verified: user.and_then(|u| u.verified).unwrap_or(false),
                provider,
            }
        })
        .collect();
    Ok(out)
}

fn normalize_flat(provider: Provider, page: FlatPage) -> Vec<RawTweet> {
    page.tweets
        .into_iter()
        .map(|t| {
            let (author_id, location, verified) = match t.author {
                Some(a) => (Some(a.id.into_string()), a.location, a.is_blue_verified),
                None => (None, None, false),
            };
            RawTweet {
                id: t.id.into_string(),
                text: normalize_text(&t.text),
                created_at: parse_timestamp(t.created_at.as_deref()),
                author_id,
                location: location
                    .map(|l| normalize_text(&l))
                    .filter(|l| !l.is_empty()),
                coordinates: None,
                public_metrics: PublicMetrics {
                    retweet_count: t.retweet_count,
                    like_count: t.like_count,
                    reply_count: t.reply_count,
                    quote_count: t.quote_count,
                },
                lang: t.lang.unwrap_or_else(|| "en".to_string()),
                user_verified: verified,
                provider,
            }
        })
        .collect()
}

fn problem_message(page: &V2Page) -> Option<String> {
    if let Some(first) = page.errors.first() {
        return Some(
            first
                .message
                .clone()
                .or_else(|| first.detail.clone())
                .unwrap_or_else(|| "provider returned errors".to_string()),
        );
    }
    match (&page.title, &page.detail) {
        (Some(t), Some(d)) => Some(format!("{t}: {d}")),
        (Some(t), None) => Some(t.clone()),
        (None, Some(d)) => Some(d.clone()),
        (None, None) => None,
    }
}

/// RFC 3339 (v2) or the legacy `Tue Dec 10 07:00:30 +0000 2024` form; now() otherwise.
pub(crate) fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| {
        DateTime::parse_from_rfc3339(s)
            .or_else(|_| DateTime::parse_from_str(s, "%a %b %d %H:%M:%S %z %Y"))
            .ok()
    })
    .map(|dt| dt.with_timezone(&Utc))
    .unwrap_or_else(Utc::now)
}

/// Running request/cost totals for the configured provider.
#[derive(Debug, Default)]
pub struct UsageMeter {
    inner: std::sync::Mutex<Usage>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct Usage {
    pub requests_made: u64,
    pub tweets_returned: u64,
    pub daily_cost: f64,
    /// Unix seconds at which the last 429 said the window reopens.
    pub rate_limit_reset: Option<i64>,
}

impl UsageMeter {
    pub fn record(&self, api_type: ApiType, tweets: usize) {
        let mut g = self.inner.lock().expect("usage mutex poisoned");
        g.requests_made += 1;
        g.tweets_returned += tweets as u64;
        g.daily_cost += api_type.cost_for(tweets);
        counter!("search_requests_total").increment(1);
    }

    /// Keep the reset from a rate-limited reply; a reply without one clears it.
    pub fn record_rate_limit(&self, reset: Option<i64>) {
        self.inner.lock().expect("usage mutex poisoned").rate_limit_reset = reset;
        counter!("search_rate_limited_total").increment(1);
    }

    pub fn snapshot(&self) -> Usage {
        *self.inner.lock().expect("usage mutex poisoned")
    }
}
