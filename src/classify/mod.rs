// src/classify/mod.rs
//! Disaster classifier: a pre-trained linear text model when one is loaded,
//! keyword matching otherwise (and for any call where the model fails).

pub mod model;

use std::path::Path;
use std::sync::Arc;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ModelError;
pub use model::LinearTextModel;

/// Fixed fallback vocabulary. Matching is case-insensitive substring containment.
pub const DISASTER_KEYWORDS: [&str; 24] = [
    "earthquake",
    "fire",
    "flood",
    "tornado",
    "hurricane",
    "wildfire",
    "emergency",
    "disaster",
    "evacuation",
    "rescue",
    "urgent",
    "help",
    "explosion",
    "collapse",
    "storm",
    "tsunami",
    "landslide",
    "avalanche",
    "accident",
    "crash",
    "incident",
    "alert",
    "warning",
    "danger",
];

const KEYWORD_BASE: f32 = 0.5;
const KEYWORD_STEP: f32 = 0.1;
const KEYWORD_CAP: f32 = 0.95;
const KEYWORD_NEGATIVE_CONFIDENCE: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    MlModel,
    KeywordMatching,
}

impl ClassificationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationMethod::MlModel => "ml_model",
            ClassificationMethod::KeywordMatching => "keyword_matching",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub is_disaster: bool,
    /// Probability of the winning class, always within [0, 1].
    pub confidence: f32,
    pub method: ClassificationMethod,
}

/// Raw model output before it is wrapped into a `ClassificationResult`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrediction {
    pub is_disaster: bool,
    pub confidence: f64,
}

/// A trained binary text model. Implementations must be pure and non-blocking.
pub trait TextModel: Send + Sync {
    fn predict(&self, text: &str) -> Result<ModelPrediction, ModelError>;
    fn name(&self) -> &'static str;
}

#[derive(Clone)]
pub struct Classifier {
    model: Option<Arc<dyn TextModel>>,
}

impl Classifier {
    /// Classifier that only ever uses keyword matching.
    pub fn keyword_only() -> Self {
        Self { model: None }
    }

    pub fn with_model(model: Arc<dyn TextModel>) -> Self {
        Self { model: Some(model) }
    }

    /// Load the vectorizer/model pair once. Missing or broken artifacts are not
    /// fatal: the classifier runs in keyword mode for the life of the process.
    pub fn load(vectorizer_path: &Path, model_path: &Path) -> Self {
        match LinearTextModel::load(vectorizer_path, model_path) {
            Ok(m) => {
                info!(
                    target: "triage",
                    features = m.feature_count(),
                    "loaded trained disaster classification model"
                );
                Self::with_model(Arc::new(m))
            }
            Err(ModelError::Io { path, source })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                warn!(target: "triage", %path, "model files not found, using keyword matching");
                Self::keyword_only()
            }
            Err(e) => {
                warn!(target: "triage", error = %e, "model artifacts rejected, using keyword matching");
                Self::keyword_only()
            }
        }
    }

    pub fn model_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Never fails: a model error degrades this single call to keyword matching.
    pub fn classify(&self, text: &str) -> ClassificationResult {
        if let Some(model) = &self.model {
            match model.predict(text) {
                Ok(p) => {
                    counter!("triage_classified_total", "method" => "ml_model").increment(1);
                    return ClassificationResult {
                        is_disaster: p.is_disaster,
                        confidence: (p.confidence as f32).clamp(0.0, 1.0),
                        method: ClassificationMethod::MlModel,
                    };
                }
                Err(e) => {
                    counter!("triage_model_fallback_total").increment(1);
                    debug!(
                        target: "triage",
                        model = model.name(),
                        id = %fingerprint(text),
                        error = %e,
                        "model prediction failed, falling back to keywords"
                    );
                }
            }
        }
        counter!("triage_classified_total", "method" => "keyword_matching").increment(1);
        keyword_classify(text)
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::keyword_only()
    }
}

/// Number of distinct fallback keywords contained in `text`.
pub fn count_keywords(text: &str) -> usize {
    let lower = text.to_lowercase();
    DISASTER_KEYWORDS
        .iter()
        .filter(|kw| lower.contains(**kw))
        .count()
}

pub fn keyword_classify(text: &str) -> ClassificationResult {
    let hits = count_keywords(text);
    let is_disaster = hits > 0;
    let confidence = if is_disaster {
        (KEYWORD_BASE + KEYWORD_STEP * hits as f32).min(KEYWORD_CAP)
    } else {
        KEYWORD_NEGATIVE_CONFIDENCE
    };
    ClassificationResult {
        is_disaster,
        confidence,
        method: ClassificationMethod::KeywordMatching,
    }
}

/// Short anonymized id for log lines; raw tweet text is never logged.
pub(crate) fn fingerprint(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
