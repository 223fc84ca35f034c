// tests/triage_pipeline.rs
//
// End-to-end triage through the public library surface:
// classify → geolocate → score, in keyword mode and with a trained model
// loaded from JSON artifacts on disk.

use std::fs;
use std::path::PathBuf;

use disaster_tweet_triage::classify::{ClassificationMethod, Classifier};
use disaster_tweet_triage::geo::Geolocator;
use disaster_tweet_triage::priority::PriorityScorer;
use disaster_tweet_triage::source::SimulationSource;
use disaster_tweet_triage::TriageService;

const QUAKE: &str = "URGENT: earthquake hits downtown, buildings collapsing!";
const SUNSET: &str = "Beautiful sunset tonight, perfect weather";

const VECTORIZER: &str = r#"{
    "vocabulary": {"urgent": 0, "earthquake": 1, "collapsing": 2, "sunset": 3, "beautiful": 4, "weather": 5},
    "idf": [1.0, 1.0, 1.0, 1.0, 1.0, 1.0],
    "ngram_range": [1, 1],
    "lowercase": true,
    "stop_words": [],
    "sublinear_tf": false,
    "norm": "l2"
}"#;

const MODEL: &str = r#"{
    "coef": [[2.0, 2.0, 2.0, -2.0, -2.0, -1.0]],
    "intercept": [0.0],
    "classes": [0, 1]
}"#;

/// Write the artifact pair into a temp dir; keep the dir alive for the test.
fn artifacts() -> (tempfile::TempDir, PathBuf, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let v = dir.path().join("tfidf_vectorizer.json");
    let m = dir.path().join("disaster_model.json");
    fs::write(&v, VECTORIZER).expect("write vectorizer");
    fs::write(&m, MODEL).expect("write model");
    (dir, v, m)
}

fn keyword_service() -> TriageService {
    TriageService::new(Classifier::keyword_only(), SimulationSource::seeded(21))
}

#[test]
fn urgent_quake_is_high_priority_in_keyword_mode() {
    let p = keyword_service().predict(QUAKE, None, None).expect("predict");
    assert!(p.is_disaster);
    assert!(p.confidence >= 0.5);
    assert_eq!(p.classification_method, ClassificationMethod::KeywordMatching);
    assert!(p.priority_score >= 0.7, "priority {}", p.priority_score);
    assert!(p.priority_factors.priority.urgency_boost > 0.0);
    assert!(p.priority_factors.priority.disaster_type_boost > 0.0);
    assert!(p.coordinates.is_none());
}

#[test]
fn sunset_is_not_a_disaster_in_keyword_mode() {
    let p = keyword_service().predict(SUNSET, None, None).expect("predict");
    assert!(!p.is_disaster);
    assert!((p.confidence - 0.3).abs() < 1e-6);
    assert_eq!(p.classification_method, ClassificationMethod::KeywordMatching);
}

#[test]
fn trained_model_is_used_when_artifacts_load() {
    let (_dir, v, m) = artifacts();
    let classifier = Classifier::load(&v, &m);
    assert!(classifier.model_loaded());
    let svc = TriageService::new(classifier, SimulationSource::seeded(21));

    let quake = svc.predict(QUAKE, None, None).expect("predict");
    assert_eq!(quake.classification_method, ClassificationMethod::MlModel);
    assert!(quake.is_disaster);
    assert!(quake.confidence >= 0.5);
    assert!(quake.priority_score >= 0.7);

    let sunset = svc.predict(SUNSET, None, None).expect("predict");
    assert_eq!(sunset.classification_method, ClassificationMethod::MlModel);
    assert!(!sunset.is_disaster);
    assert!(sunset.confidence > 0.5);
    assert!(svc.status().model_loaded);
}

#[test]
fn mismatched_artifacts_degrade_to_keywords() {
    let dir = tempfile::tempdir().expect("tempdir");
    let v = dir.path().join("v.json");
    let m = dir.path().join("m.json");
    fs::write(&v, VECTORIZER).unwrap();
    // five coefficients for six features
    fs::write(&m, r#"{"coef": [1, 1, 1, 1, 1], "intercept": 0}"#).unwrap();

    let c = Classifier::load(&v, &m);
    assert!(!c.model_loaded());
    assert_eq!(c.classify(QUAKE).method, ClassificationMethod::KeywordMatching);
}

#[test]
fn confidence_stays_in_unit_range_with_matching_method_tag() {
    let (_dir, v, m) = artifacts();
    let with_model = Classifier::load(&v, &m);
    let keywords = Classifier::keyword_only();

    let sim = SimulationSource::seeded(8);
    let mut texts: Vec<String> = sim.generate_batch(40).into_iter().map(|t| t.text).collect();
    texts.extend(
        ["", " ", "!!!", "ünïcødé earthquake 🌊", "FIRE FIRE FIRE fire", &"help ".repeat(500)]
            .iter()
            .map(|s| s.to_string()),
    );

    for t in &texts {
        let a = with_model.classify(t);
        assert!((0.0..=1.0).contains(&a.confidence), "{t:?}");
        assert_eq!(a.method, ClassificationMethod::MlModel);
        let b = keywords.classify(t);
        assert!((0.0..=1.0).contains(&b.confidence), "{t:?}");
        assert_eq!(b.method, ClassificationMethod::KeywordMatching);
    }
}

#[test]
fn score_is_bounded_and_grows_with_categories() {
    let scorer = PriorityScorer::new();
    let bases = [0.0f32, 0.3, 0.6, 0.95, 1.0];
    // each step adds one category: urgency, disaster type, action
    let ladder = ["all quiet", "breaking", "breaking tornado", "breaking tornado rescue"];

    for base in bases {
        for has_coords in [false, true] {
            let mut prev = f32::MIN;
            for text in ladder {
                let v = scorer.score(text, Some("Denver"), base, has_coords);
                assert!((0.0..=1.0).contains(&v));
                assert!(v >= prev, "{text} at base {base}: {v} < {prev}");
                prev = v;
            }
        }
    }
}

#[test]
fn geolocation_examples() {
    let g = Geolocator::new();
    let c = g.resolve(Some("37.7749,-122.4194")).expect("literal");
    assert_eq!([c.lat, c.lon], [37.7749, -122.4194]);
    assert!(g.resolve(Some("invalid text with no city")).is_none());
    let c = g.resolve(Some("I love San Francisco")).expect("city");
    assert_eq!([c.lat, c.lon], [37.7749, -122.4194]);
}

#[test]
fn location_text_adds_coordinates_and_boost() {
    let svc = keyword_service();
    let bare = svc.predict("small fire", None, None).unwrap();
    let city = svc.predict("small fire", Some("Chicago, IL"), None).unwrap();
    let vague = svc.predict("small fire", Some("somewhere nice"), None).unwrap();

    assert!(city.coordinates.is_some());
    assert!(vague.coordinates.is_none());
    assert!(city.priority_score > vague.priority_score);
    assert!(vague.priority_score > bare.priority_score);
    assert_eq!(city.priority_factors.geolocation_confidence, 0.9);
}
