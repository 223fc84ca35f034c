use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::cache::{IngestionCache, Scope, SortOrder, StreamingState, TweetQuery};
use crate::config::{StreamingConfig, TriageConfig};
use crate::error::{Result, TriageError};
use crate::scheduler::{PollingScheduler, SchedulerStatus, SessionConfig, StartOutcome};
use crate::service::{Mode, Prediction, TriageService};
use crate::tweet::{SubmittedTweet, TweetOrigin, TweetRecord};

const NOT_READY: &str = "Twitter service not initialized";
const MAX_PAGE: usize = 100;

/// Shared handles behind every route. `service` is `None` when startup failed;
/// routes that need it answer 503, cache-only routes keep working.
#[derive(Clone)]
pub struct AppState {
    service: Option<Arc<TriageService>>,
    scheduler: Option<Arc<PollingScheduler>>,
    cache: Arc<IngestionCache>,
    streaming: StreamingConfig,
    started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(service: Arc<TriageService>, cfg: &TriageConfig) -> Self {
        let scheduler = PollingScheduler::new(service.clone())
            .with_stop_timeout(Duration::from_secs(cfg.streaming.stop_timeout_secs));
        Self {
            service: Some(service),
            scheduler: Some(Arc::new(scheduler)),
            cache: Arc::new(IngestionCache::with_capacity(cfg.cache.capacity)),
            streaming: cfg.streaming.clone(),
            started_at: Utc::now(),
        }
    }

    /// State with no service: prediction/search/streaming routes return 503.
    pub fn unavailable(cfg: &TriageConfig) -> Self {
        Self {
            service: None,
            scheduler: None,
            cache: Arc::new(IngestionCache::with_capacity(cfg.cache.capacity)),
            streaming: cfg.streaming.clone(),
            started_at: Utc::now(),
        }
    }

    /// Build the service from config; a failure leaves the app up but unavailable.
    pub fn from_config(cfg: &TriageConfig) -> Self {
        match TriageService::from_config(cfg) {
            Ok(svc) => Self::new(Arc::new(svc), cfg),
            Err(e) => {
                warn!(error = %e, "triage service failed to initialize");
                Self::unavailable(cfg)
            }
        }
    }

    pub fn cache(&self) -> &Arc<IngestionCache> {
        &self.cache
    }

    fn service(&self) -> Result<&Arc<TriageService>> {
        self.service
            .as_ref()
            .ok_or_else(|| TriageError::Unavailable(NOT_READY.into()))
    }

    fn scheduler(&self) -> Result<&Arc<PollingScheduler>> {
        self.scheduler
            .as_ref()
            .ok_or_else(|| TriageError::Unavailable(NOT_READY.into()))
    }

    /// Start the polling loop feeding the cache. `Ok(false)` if it was already running.
    pub fn start_streaming(
        &self,
        interval_secs: Option<u64>,
        batch_size: Option<usize>,
    ) -> Result<bool> {
        let scheduler = self.scheduler()?;
        let interval_secs = interval_secs.unwrap_or(self.streaming.interval_secs);
        let batch_size = batch_size.unwrap_or(self.streaming.batch_size);
        if interval_secs == 0 {
            return Err(TriageError::BadRequest("interval must be at least 1 second".into()));
        }
        if batch_size == 0 || batch_size > MAX_PAGE {
            return Err(TriageError::BadRequest(format!(
                "max_tweets must be between 1 and {MAX_PAGE}"
            )));
        }
        // the cache session is reset by the scheduler before the first tick
        let outcome = scheduler.start(
            SessionConfig {
                interval: Duration::from_secs(interval_secs),
                batch_size,
            },
            self.cache.clone(),
        );
        Ok(matches!(outcome, StartOutcome::Started(_)))
    }

    /// Stop the polling loop. `Ok(false)` if nothing was running.
    pub async fn stop_streaming(&self) -> Result<bool> {
        let scheduler = self.scheduler()?;
        match scheduler.stop().await {
            Some(status) => {
                info!(target: "stream", ticks = status.ticks, delivered = status.delivered, "streaming stopped");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn streaming_report(&self) -> StreamingReport {
        StreamingReport {
            streaming: self.cache.streaming_state(),
            scheduler: self
                .scheduler
                .as_ref()
                .map(|s| s.status())
                .unwrap_or_else(|| SchedulerStatus {
                    running: false,
                    interval_secs: None,
                    batch_size: None,
                    started_at: None,
                    ticks: 0,
                    delivered: 0,
                    errors: 0,
                }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamingReport {
    pub streaming: StreamingState,
    pub scheduler: SchedulerStatus,
}

impl IntoResponse for TriageError {
    fn into_response(self) -> Response {
        let status = match &self {
            TriageError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            TriageError::BadRequest(_) => StatusCode::BAD_REQUEST,
            TriageError::Source(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/predict", post(predict))
        .route("/predict_batch", post(predict_batch))
        .route("/streaming/start", post(streaming_start))
        .route("/streaming/stop", post(streaming_stop))
        .route("/streaming/status", get(streaming_status))
        .route("/tweets/live", get(tweets_live))
        .route("/tweets/search", get(tweets_search))
        .route("/tweets/ingest", post(tweets_ingest))
        .route("/top_priority", get(top_priority))
        .route("/stats", get(stats))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn root(State(state): State<AppState>) -> Json<Value> {
    let mode = state.service.as_ref().map(|s| {
        if s.is_simulation() {
            Mode::Simulation
        } else {
            Mode::RealApi
        }
    });
    Json(json!({
        "name": "disaster-tweet-triage",
        "version": env!("CARGO_PKG_VERSION"),
        "mode": mode,
        "endpoints": [
            "GET /health", "POST /predict", "POST /predict_batch",
            "POST /streaming/start", "POST /streaming/stop", "GET /streaming/status",
            "GET /tweets/live", "GET /tweets/search", "POST /tweets/ingest",
            "GET /top_priority", "GET /stats", "GET /metrics"
        ],
    }))
}

async fn health(State(state): State<AppState>) -> Result<Json<Value>> {
    let svc = state.service()?;
    let stats = state.cache.stats();
    Ok(Json(json!({
        "status": "healthy",
        "service": svc.status(),
        "streaming": state.cache.streaming_state(),
        "cache": {
            "tweets_cached": stats.total_cached,
            "disaster_tweets": stats.disaster_tweets,
            "live_tweets": stats.live_tweets,
        },
        "timestamp": Utc::now(),
    })))
}

#[derive(Debug, Deserialize)]
struct PredictReq {
    text: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    keyword: Option<String>,
}

async fn predict(
    State(state): State<AppState>,
    Json(body): Json<PredictReq>,
) -> Result<Json<Prediction>> {
    let svc = state.service()?;
    let p = svc.predict(&body.text, body.location.as_deref(), body.keyword.as_deref())?;
    Ok(Json(p))
}

#[derive(Debug, Deserialize)]
struct BatchReq {
    tweets: Vec<PredictReq>,
}

#[derive(Debug, Serialize)]
struct BatchResp {
    results: Vec<Prediction>,
    total_processed: usize,
    disaster_count: usize,
    timestamp: DateTime<Utc>,
}

async fn predict_batch(
    State(state): State<AppState>,
    Json(body): Json<BatchReq>,
) -> Result<Json<BatchResp>> {
    let svc = state.service()?;
    let results = svc.predict_batch(
        body.tweets
            .iter()
            .map(|t| (t.text.as_str(), t.location.as_deref())),
    );
    Ok(Json(BatchResp {
        total_processed: results.len(),
        disaster_count: results.iter().filter(|p| p.is_disaster).count(),
        results,
        timestamp: Utc::now(),
    }))
}

#[derive(Debug, Default, Deserialize)]
struct StartReq {
    /// Poll interval in seconds.
    #[serde(default)]
    interval: Option<u64>,
    /// Batch size per poll.
    #[serde(default)]
    max_tweets: Option<usize>,
}

#[derive(Debug, Serialize)]
struct StreamingResp {
    message: &'static str,
    #[serde(flatten)]
    report: StreamingReport,
    timestamp: DateTime<Utc>,
}

async fn streaming_start(
    State(state): State<AppState>,
    Json(body): Json<StartReq>,
) -> Result<Json<StreamingResp>> {
    let started = state.start_streaming(body.interval, body.max_tweets)?;
    Ok(Json(StreamingResp {
        message: if started {
            "Streaming started"
        } else {
            "Streaming already active"
        },
        report: state.streaming_report(),
        timestamp: Utc::now(),
    }))
}

async fn streaming_stop(State(state): State<AppState>) -> Result<Json<StreamingResp>> {
    let stopped = state.stop_streaming().await?;
    Ok(Json(StreamingResp {
        message: if stopped {
            "Streaming stopped"
        } else {
            "Streaming was not active"
        },
        report: state.streaming_report(),
        timestamp: Utc::now(),
    }))
}

async fn streaming_status(State(state): State<AppState>) -> Result<Json<Value>> {
    let svc = state.service()?;
    let stats = state.cache.stats();
    Ok(Json(json!({
        "report": state.streaming_report(),
        "service": svc.status(),
        "cache": {
            "total_tweets": stats.total_cached,
            "disaster_tweets": stats.disaster_tweets,
            "live_tweets": stats.live_tweets,
        },
        "timestamp": Utc::now(),
    })))
}

#[derive(Debug, Deserialize)]
struct LiveParams {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    min_priority: Option<f32>,
}

#[derive(Debug, Serialize)]
struct LiveResp {
    tweets: Vec<TweetRecord>,
    total_available: usize,
    returned: usize,
    cache_size: usize,
    last_update: Option<DateTime<Utc>>,
    streaming_active: bool,
    timestamp: DateTime<Utc>,
}

async fn tweets_live(
    State(state): State<AppState>,
    Query(p): Query<LiveParams>,
) -> Result<Json<LiveResp>> {
    let min_priority = p.min_priority.unwrap_or(0.0);
    if !(0.0..=1.0).contains(&min_priority) {
        return Err(TriageError::BadRequest("min_priority must be within [0, 1]".into()));
    }
    let limit = p.limit.unwrap_or(50);

    let mut tweets = state.cache.query(&TweetQuery {
        scope: Scope::Live,
        disaster_only: true,
        min_priority: Some(min_priority),
        sort: SortOrder::Priority,
        ..Default::default()
    });
    let total_available = tweets.len();
    tweets.truncate(limit);
    let stream = state.cache.streaming_state();

    Ok(Json(LiveResp {
        returned: tweets.len(),
        tweets,
        total_available,
        cache_size: state.cache.live_len(),
        last_update: stream.last_update_at,
        streaming_active: stream.active,
        timestamp: Utc::now(),
    }))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    max_results: Option<usize>,
    #[serde(default)]
    disaster_only: Option<bool>,
}

#[derive(Debug, Serialize)]
struct SearchResp {
    query: Option<String>,
    tweets: Vec<TweetRecord>,
    total_found: usize,
    disaster_tweets: usize,
    api_mode: Mode,
    timestamp: DateTime<Utc>,
}

async fn tweets_search(
    State(state): State<AppState>,
    Query(p): Query<SearchParams>,
) -> Result<Json<SearchResp>> {
    let svc = state.service()?;
    let max_results = p.max_results.unwrap_or(50);
    if max_results == 0 || max_results > MAX_PAGE {
        return Err(TriageError::BadRequest(format!(
            "max_results must be between 1 and {MAX_PAGE}"
        )));
    }

    let found = svc
        .search(p.query.as_deref(), max_results, TweetOrigin::Search)
        .await;
    let total_found = found.len();
    let disaster_tweets = found.iter().filter(|t| t.is_disaster).count();
    let mut tweets: Vec<TweetRecord> = if p.disaster_only.unwrap_or(true) {
        found.into_iter().filter(|t| t.is_disaster).collect()
    } else {
        found
    };
    tweets.sort_by(|a, b| {
        b.priority_score
            .partial_cmp(&a.priority_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok(Json(SearchResp {
        query: p.query,
        tweets,
        total_found,
        disaster_tweets,
        api_mode: if svc.is_simulation() {
            Mode::Simulation
        } else {
            Mode::RealApi
        },
        timestamp: Utc::now(),
    }))
}

#[derive(Debug, Deserialize)]
struct IngestParams {
    #[serde(default)]
    count: Option<usize>,
}

/// Empty body: pull `count` tweets from the active source and keep the disasters.
/// JSON body (a list, or `{"tweets": [...]}`): process and keep every submitted tweet.
async fn tweets_ingest(
    State(state): State<AppState>,
    Query(p): Query<IngestParams>,
    body: Bytes,
) -> Result<Json<Value>> {
    let svc = state.service()?;
    if !body.iter().all(u8::is_ascii_whitespace) {
        return ingest_submitted(&state, svc, &body);
    }
    let count = p.count.unwrap_or(10);
    if count == 0 || count > MAX_PAGE {
        return Err(TriageError::BadRequest(format!(
            "count must be between 1 and {MAX_PAGE}"
        )));
    }
    let fetched = svc.search(None, count, TweetOrigin::Manual).await;
    let generated = fetched.len();
    let disasters: Vec<TweetRecord> = fetched.into_iter().filter(|t| t.is_disaster).collect();
    let ingested = disasters.len();
    state.cache.ingest(disasters);

    Ok(Json(json!({
        "message": format!("Ingested {ingested} disaster tweets"),
        "fetched": generated,
        "disaster_tweets": ingested,
        "cache_size": state.cache.live_len(),
        "timestamp": Utc::now(),
    })))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Submission {
    List(Vec<SubmittedTweet>),
    Wrapped { tweets: Vec<SubmittedTweet> },
}

fn ingest_submitted(state: &AppState, svc: &TriageService, body: &[u8]) -> Result<Json<Value>> {
    let submitted = match serde_json::from_slice::<Submission>(body) {
        Ok(Submission::List(t)) | Ok(Submission::Wrapped { tweets: t }) => t,
        Err(_) => {
            return Err(TriageError::BadRequest(
                "body must be a list of tweets or {\"tweets\": [...]}".into(),
            ))
        }
    };
    let records: Vec<TweetRecord> = submitted
        .into_iter()
        .enumerate()
        .filter_map(|(i, t)| t.into_raw(i))
        .map(|raw| svc.process(raw, TweetOrigin::Manual))
        .collect();
    let processed = records.len();
    let disaster_count = records.iter().filter(|t| t.is_disaster).count();
    state.cache.ingest(records);
    info!(processed, disaster_count, "ingested submitted tweets");

    Ok(Json(json!({
        "message": format!("Ingested {processed} tweets"),
        "processed_tweets": processed,
        "disaster_count": disaster_count,
        "cache_size": state.cache.live_len(),
        "timestamp": Utc::now(),
    })))
}

#[derive(Debug, Deserialize)]
struct TopParams {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    source: Option<String>,
}

async fn top_priority(
    State(state): State<AppState>,
    Query(p): Query<TopParams>,
) -> Result<Json<Value>> {
    let scope: Scope = match p.source.as_deref() {
        None => Scope::Live,
        Some(s) => s.parse().map_err(TriageError::BadRequest)?,
    };
    let limit = p.limit.unwrap_or(10);

    let mut tweets = state.cache.query(&TweetQuery {
        scope,
        disaster_only: true,
        sort: SortOrder::Priority,
        ..Default::default()
    });
    let total = tweets.len();
    tweets.truncate(limit);

    Ok(Json(json!({
        "returned": tweets.len(),
        "top_priority_tweets": tweets,
        "total_disaster_tweets": total,
        "source": scope,
        "timestamp": Utc::now(),
    })))
}

async fn stats(State(state): State<AppState>) -> Result<Json<Value>> {
    let svc = state.service()?;
    let now = Utc::now();
    Ok(Json(json!({
        "system": {
            "version": env!("CARGO_PKG_VERSION"),
            "started_at": state.started_at,
            "uptime_secs": (now - state.started_at).num_seconds().max(0),
            "timestamp": now,
        },
        "twitter_api": svc.status(),
        "streaming": state.streaming_report(),
        "cache": state.cache.stats(),
        "usage": svc.usage(),
    })))
}
