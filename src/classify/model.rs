// src/classify/model.rs
//! TF-IDF vectorizer + logistic regression, loaded from JSON artifacts.
//!
//! Vectorizer JSON:
//! {
//!   "vocabulary": { "earthquake": 0, "earthquake hits": 1, ... },
//!   "idf": [1.5, 2.0, ...],
//!   "ngram_range": [1, 2],
//!   "lowercase": true,
//!   "stop_words": ["the", "a", ...],
//!   "sublinear_tf": false,
//!   "norm": "l2"
//! }
//!
//! Model JSON (`coef` and `intercept` may be nested the way the trainer dumps them):
//! { "coef": [[0.3, -1.2, ...]], "intercept": [-0.1], "classes": [0, 1] }

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{ModelPrediction, TextModel};
use crate::error::ModelError;

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?u)\b\w\w+\b").expect("token regex"));

fn default_ngram_range() -> (usize, usize) {
    (1, 1)
}
fn default_true() -> bool {
    true
}
fn default_norm() -> Option<Norm> {
    Some(Norm::L2)
}
fn default_classes() -> Vec<i64> {
    vec![0, 1]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Norm {
    L1,
    L2,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TfidfVectorizer {
    pub vocabulary: HashMap<String, usize>,
    pub idf: Vec<f64>,
    #[serde(default = "default_ngram_range")]
    pub ngram_range: (usize, usize),
    #[serde(default = "default_true")]
    pub lowercase: bool,
    #[serde(default)]
    pub stop_words: HashSet<String>,
    #[serde(default)]
    pub sublinear_tf: bool,
    #[serde(default = "default_norm")]
    pub norm: Option<Norm>,
}

impl TfidfVectorizer {
    /// Sparse feature vector as `(index, weight)` pairs, sorted by index.
    pub fn transform(&self, text: &str) -> Result<Vec<(usize, f64)>, ModelError> {
        let lowered;
        let text = if self.lowercase {
            lowered = text.to_lowercase();
            lowered.as_str()
        } else {
            text
        };

        let tokens: Vec<&str> = TOKEN_RE
            .find_iter(text)
            .map(|m| m.as_str())
            .filter(|t| !self.stop_words.contains(*t))
            .collect();

        let (min_n, max_n) = self.ngram_range;
        let mut counts: BTreeMap<usize, f64> = BTreeMap::new();
        for n in min_n.max(1)..=max_n {
            for window in tokens.windows(n) {
                let term = window.join(" ");
                if let Some(&idx) = self.vocabulary.get(&term) {
                    *counts.entry(idx).or_insert(0.0) += 1.0;
                }
            }
        }

        let mut features = Vec::with_capacity(counts.len());
        for (idx, tf) in counts {
            let idf = self.idf.get(idx).copied().ok_or_else(|| {
                ModelError::Shape(format!("vocabulary index {idx} has no idf weight"))
            })?;
            let tf = if self.sublinear_tf { 1.0 + tf.ln() } else { tf };
            features.push((idx, tf * idf));
        }

        let norm = match self.norm {
            Some(Norm::L2) => features.iter().map(|(_, v)| v * v).sum::<f64>().sqrt(),
            Some(Norm::L1) => features.iter().map(|(_, v)| v.abs()).sum::<f64>(),
            None => 1.0,
        };
        if norm > 0.0 {
            for (_, v) in features.iter_mut() {
                *v /= norm;
            }
        }
        Ok(features)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Weights {
    Flat(Vec<f64>),
    Nested(Vec<Vec<f64>>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Intercept {
    Scalar(f64),
    List(Vec<f64>),
}

#[derive(Deserialize)]
struct LogisticArtifact {
    coef: Weights,
    intercept: Intercept,
    #[serde(default = "default_classes")]
    classes: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct LogisticModel {
    pub coef: Vec<f64>,
    pub intercept: f64,
    pub classes: [i64; 2],
}

impl TryFrom<LogisticArtifact> for LogisticModel {
    type Error = ModelError;

    fn try_from(a: LogisticArtifact) -> Result<Self, Self::Error> {
        let coef = match a.coef {
            Weights::Flat(v) => v,
            Weights::Nested(mut rows) => {
                if rows.len() != 1 {
                    return Err(ModelError::Shape(format!(
                        "expected a single coefficient row, got {}",
                        rows.len()
                    )));
                }
                rows.remove(0)
            }
        };
        let intercept = match a.intercept {
            Intercept::Scalar(b) => b,
            Intercept::List(v) => v
                .first()
                .copied()
                .ok_or_else(|| ModelError::Shape("empty intercept".into()))?,
        };
        let classes: [i64; 2] = a.classes.try_into().map_err(|v: Vec<i64>| {
            ModelError::Shape(format!("binary model needs 2 classes, got {}", v.len()))
        })?;
        Ok(Self {
            coef,
            intercept,
            classes,
        })
    }
}

/// Vectorizer + logistic regression pair validated against each other.
#[derive(Debug, Clone)]
pub struct LinearTextModel {
    vectorizer: TfidfVectorizer,
    model: LogisticModel,
}

impl LinearTextModel {
    pub fn new(vectorizer: TfidfVectorizer, model: LogisticModel) -> Result<Self, ModelError> {
        let dims = vectorizer.idf.len();
        if model.coef.len() != dims {
            return Err(ModelError::Shape(format!(
                "model has {} coefficients but vectorizer has {} features",
                model.coef.len(),
                dims
            )));
        }
        if let Some((term, idx)) = vectorizer.vocabulary.iter().find(|(_, idx)| **idx >= dims) {
            return Err(ModelError::Shape(format!(
                "term {term:?} maps to index {idx} outside {dims} features"
            )));
        }
        if vectorizer.ngram_range.0 > vectorizer.ngram_range.1 {
            return Err(ModelError::Shape(format!(
                "invalid ngram_range {:?}",
                vectorizer.ngram_range
            )));
        }
        Ok(Self { vectorizer, model })
    }

    /// Load both artifacts from disk.
    pub fn load(vectorizer_path: &Path, model_path: &Path) -> Result<Self, ModelError> {
        let vectorizer: TfidfVectorizer = read_json(vectorizer_path)?;
        let artifact: LogisticArtifact = read_json(model_path)?;
        Self::new(vectorizer, LogisticModel::try_from(artifact)?)
    }

    /// Parse both artifacts from in-memory JSON strings.
    pub fn from_json_strs(vectorizer_json: &str, model_json: &str) -> Result<Self, ModelError> {
        let vectorizer: TfidfVectorizer =
            serde_json::from_str(vectorizer_json).map_err(|source| ModelError::Parse {
                path: "<inline vectorizer>".into(),
                source,
            })?;
        let artifact: LogisticArtifact =
            serde_json::from_str(model_json).map_err(|source| ModelError::Parse {
                path: "<inline model>".into(),
                source,
            })?;
        Self::new(vectorizer, LogisticModel::try_from(artifact)?)
    }

    pub fn feature_count(&self) -> usize {
        self.vectorizer.idf.len()
    }

    /// Raw decision value `intercept + coef · x`.
    pub fn decision_function(&self, text: &str) -> Result<f64, ModelError> {
        let features = self.vectorizer.transform(text)?;
        let d = features
            .iter()
            .fold(self.model.intercept, |acc, &(idx, v)| {
                acc + self.model.coef[idx] * v
            });
        if d.is_finite() {
            Ok(d)
        } else {
            Err(ModelError::NonFinite)
        }
    }
}

impl TextModel for LinearTextModel {
    fn predict(&self, text: &str) -> Result<ModelPrediction, ModelError> {
        let d = self.decision_function(text)?;
        let p_positive = 1.0 / (1.0 + (-d).exp());
        let label = if d > 0.0 {
            self.model.classes[1]
        } else {
            self.model.classes[0]
        };
        Ok(ModelPrediction {
            is_disaster: label == 1,
            confidence: p_positive.max(1.0 - p_positive),
        })
    }

    fn name(&self) -> &'static str {
        "tfidf_logreg"
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ModelError> {
    let raw = fs::read_to_string(path).map_err(|source| ModelError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ModelError::Parse {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VECTORIZER: &str = r#"{
        "vocabulary": {"earthquake": 0, "fire": 1, "sunset": 2, "earthquake hits": 3, "the": 4},
        "idf": [1.5, 1.5, 1.2, 2.0, 1.0],
        "ngram_range": [1, 2],
        "stop_words": ["the"],
        "norm": "l2"
    }"#;

    const MODEL: &str = r#"{
        "coef": [[2.0, 2.0, -2.0, 1.0, 5.0]],
        "intercept": [-0.5],
        "classes": [0, 1]
    }"#;

    fn model() -> LinearTextModel {
        LinearTextModel::from_json_strs(VECTORIZER, MODEL).unwrap()
    }

    #[test]
    fn transform_builds_l2_normalized_unigrams_and_bigrams() {
        let m = model();
        let x = m.vectorizer.transform("URGENT: Earthquake hits downtown").unwrap();
        assert_eq!(x.len(), 2);
        assert_eq!(x[0].0, 0);
        assert_eq!(x[1].0, 3);
        assert!((x[0].1 - 0.6).abs() < 1e-9);
        assert!((x[1].1 - 0.8).abs() < 1e-9);
    }

    #[test]
    fn stop_words_never_contribute() {
        let m = model();
        let x = m.vectorizer.transform("the the the").unwrap();
        assert!(x.is_empty());
        // intercept only
        assert!((m.decision_function("the").unwrap() + 0.5).abs() < 1e-9);
    }

    #[test]
    fn predicts_positive_with_winning_class_probability() {
        let p = model().predict("URGENT: earthquake hits downtown").unwrap();
        assert!(p.is_disaster);
        // d = -0.5 + 2.0*0.6 + 1.0*0.8 = 1.5
        let expected = 1.0 / (1.0 + (-1.5f64).exp());
        assert!((p.confidence - expected).abs() < 1e-9);
    }

    #[test]
    fn predicts_negative_with_complement_probability() {
        let p = model().predict("Beautiful sunset tonight").unwrap();
        assert!(!p.is_disaster);
        // d = -0.5 - 2.0 = -2.5
        let expected = 1.0 - 1.0 / (1.0 + 2.5f64.exp());
        assert!((p.confidence - expected).abs() < 1e-9);
        assert!(p.confidence > 0.5 && p.confidence <= 1.0);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let bad = r#"{"coef": [1.0, 2.0], "intercept": 0.0}"#;
        let err = LinearTextModel::from_json_strs(VECTORIZER, bad).unwrap_err();
        assert!(matches!(err, ModelError::Shape(_)));
    }

    #[test]
    fn vocabulary_index_out_of_range_is_rejected() {
        let vec_json = r#"{"vocabulary": {"flood": 3}, "idf": [1.0]}"#;
        let err = LinearTextModel::from_json_strs(vec_json, r#"{"coef": [1.0], "intercept": 0.0}"#)
            .unwrap_err();
        assert!(matches!(err, ModelError::Shape(_)));
    }

    #[test]
    fn loads_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let vp = dir.path().join("tfidf_vectorizer.json");
        let mp = dir.path().join("disaster_model.json");
        fs::File::create(&vp)
            .unwrap()
            .write_all(VECTORIZER.as_bytes())
            .unwrap();
        fs::File::create(&mp)
            .unwrap()
            .write_all(MODEL.as_bytes())
            .unwrap();

        let m = LinearTextModel::load(&vp, &mp).unwrap();
        assert_eq!(m.feature_count(), 5);

        let missing = LinearTextModel::load(&dir.path().join("nope.json"), &mp).unwrap_err();
        assert!(matches!(missing, ModelError::Io { .. }));
    }
}
