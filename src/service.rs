//! # Triage Service
//! Wires the pipeline: classify → geolocate → score, for single predictions,
//! provider searches and streaming batches.
//!
//! Fallbacks are decided here, not in the sources:
//! - search failures become an empty batch,
//! - streaming failures become a simulated batch,
//! - model failures are already absorbed by the classifier.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::classify::{fingerprint, ClassificationMethod, Classifier};
use crate::config::TriageConfig;
use crate::error::{Result, SourceError, TriageError};
use crate::geo::Geolocator;
use crate::priority::{PriorityFactors, PriorityScorer};
use crate::scheduler::BatchSource;
use crate::source::search::{Usage, UsageMeter};
use crate::source::{default_query, ApiType, SearchSource, SimulationSource, TweetSource};
use crate::tweet::{Coordinates, RawTweet, TweetOrigin, TweetRecord};

/// Request keywords that earn an informational hint in the prediction breakdown.
const HINT_KEYWORDS: [&str; 3] = ["fire", "earthquake", "flood"];
const HINT_VALUE: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Simulation,
    RealApi,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub mode: Mode,
    pub api_type: ApiType,
    pub api_key_configured: bool,
    pub model_loaded: bool,
    pub requests_made: u64,
    pub tweets_returned: u64,
    pub daily_cost: f64,
    pub rate_limit_reset: Option<i64>,
}

/// Breakdown returned by `predict`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionFactors {
    #[serde(flatten)]
    pub priority: PriorityFactors,
    /// Informational only; not part of `priority_score`.
    pub keyword_hint: f32,
    pub geolocation_confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub text: String,
    pub location: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub is_disaster: bool,
    pub confidence: f32,
    pub priority_score: f32,
    pub classification_method: ClassificationMethod,
    pub priority_factors: PredictionFactors,
    pub processed_at: DateTime<Utc>,
}

pub struct TriageService {
    classifier: Classifier,
    geolocator: Geolocator,
    scorer: PriorityScorer,
    simulation: SimulationSource,
    /// `None` means simulation mode.
    search: Option<Arc<dyn TweetSource>>,
    api_type: ApiType,
    usage: UsageMeter,
}

impl TriageService {
    /// Simulation-only service around `classifier`.
    pub fn new(classifier: Classifier, simulation: SimulationSource) -> Self {
        Self {
            classifier,
            geolocator: Geolocator::new(),
            scorer: PriorityScorer::new(),
            simulation,
            search: None,
            api_type: ApiType::Official,
            usage: UsageMeter::default(),
        }
    }

    /// Attach an external search source; the service leaves simulation mode.
    pub fn with_search(mut self, api_type: ApiType, search: Arc<dyn TweetSource>) -> Self {
        self.api_type = api_type;
        self.search = Some(search);
        self
    }

    /// Build from config: load model artifacts, pick simulation or a provider.
    pub fn from_config(cfg: &TriageConfig) -> anyhow::Result<Self> {
        let classifier = Classifier::load(&cfg.model.vectorizer_path, &cfg.model.model_path);
        let mut svc = Self::new(classifier, SimulationSource::new());
        svc.api_type = cfg.twitter.api_type;

        match cfg.twitter.credential() {
            Some(token) if !cfg.twitter.effective_simulation() => {
                let source = SearchSource::new(
                    cfg.twitter.api_type,
                    token,
                    Duration::from_secs(cfg.twitter.request_timeout_secs.max(1)),
                    cfg.twitter.max_results_cap,
                )?;
                svc = svc.with_search(cfg.twitter.api_type, Arc::new(source));
            }
            Some(_) => info!(target: "search", "credentials present but simulation_mode is on"),
            None => info!(
                target: "search",
                api = cfg.twitter.api_type.as_str(),
                "no credentials configured, running in simulation mode"
            ),
        }
        Ok(svc)
    }

    pub fn is_simulation(&self) -> bool {
        self.search.is_none()
    }

    pub fn model_loaded(&self) -> bool {
        self.classifier.model_loaded()
    }

    /// Classify, geolocate and score one raw tweet. Provider coordinates win
    /// over geolocated location text.
    pub fn process(&self, raw: RawTweet, origin: TweetOrigin) -> TweetRecord {
        let classification = self.classifier.classify(&raw.text);
        let coordinates = raw
            .coordinates
            .or_else(|| self.geolocator.resolve(raw.location.as_deref()));
        let priority_score = self.scorer.score(
            &raw.text,
            raw.location.as_deref(),
            classification.confidence,
            coordinates.is_some(),
        );
        let simulated = raw.simulated();

        TweetRecord {
            id: raw.id,
            text: raw.text,
            created_at: raw.created_at,
            author_id: raw.author_id,
            location: raw.location,
            coordinates,
            is_disaster: classification.is_disaster,
            confidence: classification.confidence,
            priority_score,
            classification_method: classification.method,
            source: origin,
            provider: raw.provider,
            simulated,
            public_metrics: raw.public_metrics,
            lang: raw.lang,
            user_verified: raw.user_verified,
        }
    }

    pub fn predict(
        &self,
        text: &str,
        location: Option<&str>,
        keyword: Option<&str>,
    ) -> Result<Prediction> {
        if text.trim().is_empty() {
            return Err(TriageError::BadRequest("text must not be empty".into()));
        }
        let location = location.map(str::trim).filter(|l| !l.is_empty());
        let classification = self.classifier.classify(text);
        let resolution = self.geolocator.resolve_detailed(location);
        let factors = self.scorer.factors(
            text,
            location,
            classification.confidence,
            resolution.is_some(),
        );
        let keyword_hint = keyword
            .map(|k| k.trim().to_lowercase())
            .filter(|k| HINT_KEYWORDS.contains(&k.as_str()))
            .map_or(0.0, |_| HINT_VALUE);

        debug!(
            target: "triage",
            id = %fingerprint(text),
            is_disaster = classification.is_disaster,
            method = classification.method.as_str(),
            "prediction"
        );

        Ok(Prediction {
            text: text.to_string(),
            location: location.map(str::to_string),
            coordinates: resolution.map(|r| r.coordinates),
            is_disaster: classification.is_disaster,
            confidence: classification.confidence,
            priority_score: factors.total(),
            classification_method: classification.method,
            priority_factors: PredictionFactors {
                priority: factors,
                keyword_hint,
                geolocation_confidence: resolution.map_or(0.0, |r| r.confidence()),
            },
            processed_at: Utc::now(),
        })
    }

    /// Predict each item; empty texts are skipped. Sorted by priority descending (stable).
    pub fn predict_batch<'a, I>(&self, items: I) -> Vec<Prediction>
    where
        I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
    {
        let mut out: Vec<Prediction> = items
            .into_iter()
            .filter_map(|(text, location)| match self.predict(text, location, None) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(target: "triage", error = %e, "skipping batch item");
                    None
                }
            })
            .collect();
        out.sort_by(|a, b| {
            b.priority_score
                .partial_cmp(&a.priority_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        out
    }

    /// Search tweets and process them. Provider failures yield an empty batch.
    pub async fn search(
        &self,
        query: Option<&str>,
        max_results: usize,
        origin: TweetOrigin,
    ) -> Vec<TweetRecord> {
        let raws = match &self.search {
            None => self.simulation.generate_batch(max_results),
            Some(source) => {
                let query = query
                    .map(str::trim)
                    .filter(|q| !q.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(default_query);
                match source.fetch(&query, max_results).await {
                    Ok(raws) => {
                        self.usage.record(self.api_type, raws.len());
                        raws
                    }
                    Err(e) => {
                        self.note_failure(&e);
                        warn!(target: "search", error = %e, "search failed, returning empty batch");
                        Vec::new()
                    }
                }
            }
        };
        raws.into_iter().map(|r| self.process(r, origin)).collect()
    }

    /// One streaming batch. Provider failures fall back to simulated tweets.
    pub async fn stream_batch(&self, max_results: usize) -> Vec<TweetRecord> {
        let raws = match &self.search {
            None => self.simulation.generate_batch(max_results),
            Some(source) => match source.fetch(&default_query(), max_results).await {
                Ok(raws) => {
                    self.usage.record(self.api_type, raws.len());
                    raws
                }
                Err(e) => {
                    self.note_failure(&e);
                    warn!(target: "stream", error = %e, "provider failed, streaming simulated batch");
                    self.simulation.generate_batch(max_results)
                }
            },
        };
        raws.into_iter()
            .map(|r| self.process(r, TweetOrigin::Stream))
            .collect()
    }

    fn note_failure(&self, e: &SourceError) {
        counter!("search_errors_total").increment(1);
        if let SourceError::RateLimited { reset } = e {
            self.usage.record_rate_limit(*reset);
        }
    }

    pub fn usage(&self) -> Usage {
        self.usage.snapshot()
    }

    pub fn status(&self) -> ServiceStatus {
        let usage = self.usage.snapshot();
        ServiceStatus {
            mode: if self.is_simulation() {
                Mode::Simulation
            } else {
                Mode::RealApi
            },
            api_type: self.api_type,
            api_key_configured: self.search.is_some(),
            model_loaded: self.model_loaded(),
            requests_made: usage.requests_made,
            tweets_returned: usage.tweets_returned,
            daily_cost: usage.daily_cost,
            rate_limit_reset: usage.rate_limit_reset,
        }
    }
}

#[async_trait]
impl BatchSource for TriageService {
    async fn next_batch(&self, max: usize) -> Result<Vec<TweetRecord>> {
        Ok(self.stream_batch(max).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tweet::{Provider, PublicMetrics};

    struct Failing;

    #[async_trait]
    impl TweetSource for Failing {
        async fn fetch(&self, _q: &str, _n: usize) -> std::result::Result<Vec<RawTweet>, SourceError> {
            Err(SourceError::RateLimited {
                reset: Some(1_700_000_123),
            })
        }
    }

    fn svc() -> TriageService {
        TriageService::new(Classifier::keyword_only(), SimulationSource::seeded(11))
    }

    fn raw(text: &str, location: Option<&str>) -> RawTweet {
        RawTweet {
            id: "r1".into(),
            text: text.into(),
            created_at: Utc::now(),
            author_id: None,
            location: location.map(str::to_string),
            coordinates: None,
            public_metrics: PublicMetrics::default(),
            lang: "en".into(),
            user_verified: false,
            provider: Provider::OfficialApi,
        }
    }

    #[test]
    fn process_geolocates_location_text() {
        let r = svc().process(raw("URGENT: earthquake hits downtown", Some("Houston, TX")), TweetOrigin::Search);
        assert!(r.is_disaster);
        assert_eq!(r.coordinates, Coordinates::checked(29.7604, -95.3698));
        assert_eq!(r.source, TweetOrigin::Search);
        assert!(!r.simulated);
        // 0.7 + urgency + disaster type + coordinates
        assert_eq!(r.priority_score, 1.0);
    }

    #[test]
    fn unresolved_location_gets_text_boost() {
        let r = svc().process(raw("calm evening", Some("my backyard")), TweetOrigin::Manual);
        assert!(!r.is_disaster);
        assert!(r.coordinates.is_none());
        assert!((r.priority_score - 0.4).abs() < 1e-6);
    }

    #[test]
    fn predict_reports_breakdown() {
        let p = svc()
            .predict("Flood waters rising", Some("40.7128,-74.0060"), Some("Flood"))
            .unwrap();
        assert!(p.is_disaster);
        assert_eq!(p.priority_factors.geolocation_confidence, 0.8);
        assert_eq!(p.priority_factors.keyword_hint, 0.1);
        assert_eq!(p.priority_factors.priority.location_boost, 0.15);
        assert!((p.priority_score - p.priority_factors.priority.total()).abs() < 1e-6);
    }

    #[test]
    fn predict_rejects_blank_text() {
        assert!(matches!(
            svc().predict("   ", None, None),
            Err(TriageError::BadRequest(_))
        ));
    }

    #[test]
    fn batch_is_sorted_and_skips_blanks() {
        let out = svc().predict_batch([
            ("nice day", None),
            ("", None),
            ("URGENT fire, evacuation now", Some("Miami")),
        ]);
        assert_eq!(out.len(), 2);
        assert!(out[0].priority_score >= out[1].priority_score);
        assert!(out[0].is_disaster);
    }

    #[tokio::test]
    async fn failing_provider_empty_search_but_simulated_stream() {
        let s = svc().with_search(ApiType::Official, Arc::new(Failing));
        assert!(!s.is_simulation());
        assert!(s.search(Some("fire"), 10, TweetOrigin::Search).await.is_empty());
        let streamed = s.stream_batch(10).await;
        assert_eq!(streamed.len(), 10);
        assert!(streamed.iter().all(|t| t.simulated && t.source == TweetOrigin::Stream));
        assert_eq!(s.usage().requests_made, 0);
        assert_eq!(s.usage().rate_limit_reset, Some(1_700_000_123));
        assert_eq!(s.status().rate_limit_reset, Some(1_700_000_123));
    }

    #[tokio::test]
    async fn simulation_search_tags_origin() {
        let out = svc().search(None, 5, TweetOrigin::Manual).await;
        assert_eq!(out.len(), 5);
        assert!(out.iter().all(|t| t.source == TweetOrigin::Manual && t.simulated));
        assert_eq!(svc().status().mode, Mode::Simulation);
    }
}
