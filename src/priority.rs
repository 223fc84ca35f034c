//! Priority scoring: base classification confidence plus fixed contextual boosts.
//!
//! Each boost category contributes its constant at most once, regardless of
//! how many of its keywords match:
//! - urgency       +0.20  (urgent, emergency, help, breaking, critical, severe, major)
//! - disaster type +0.15  (fire, earthquake, flood, tornado, hurricane, explosion)
//! - location      +0.15  coordinates resolved, else +0.10 for unresolved location text
//! - action        +0.10  (evacuation, rescue, emergency services, first responders)
//!
//! Final score = clamp(base + boosts, 0, 1).

use serde::Serialize;

pub const URGENCY_KEYWORDS: [&str; 7] = [
    "urgent",
    "emergency",
    "help",
    "breaking",
    "critical",
    "severe",
    "major",
];
pub const DISASTER_TYPE_KEYWORDS: [&str; 6] = [
    "fire",
    "earthquake",
    "flood",
    "tornado",
    "hurricane",
    "explosion",
];
pub const ACTION_KEYWORDS: [&str; 4] = [
    "evacuation",
    "rescue",
    "emergency services",
    "first responders",
];

pub const URGENCY_BOOST: f32 = 0.20;
pub const DISASTER_TYPE_BOOST: f32 = 0.15;
pub const COORDINATES_BOOST: f32 = 0.15;
pub const LOCATION_TEXT_BOOST: f32 = 0.10;
pub const ACTION_BOOST: f32 = 0.10;

/// Per-factor view of a score, returned by the prediction endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PriorityFactors {
    pub base_confidence: f32,
    pub urgency_boost: f32,
    pub disaster_type_boost: f32,
    pub location_boost: f32,
    pub action_boost: f32,
}

impl PriorityFactors {
    pub fn total(&self) -> f32 {
        let raw = self.base_confidence
            + self.urgency_boost
            + self.disaster_type_boost
            + self.location_boost
            + self.action_boost;
        raw.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityScorer;

impl PriorityScorer {
    pub fn new() -> Self {
        Self
    }

    /// Deterministic score in [0, 1].
    pub fn score(
        &self,
        text: &str,
        location: Option<&str>,
        base_confidence: f32,
        has_coordinates: bool,
    ) -> f32 {
        self.factors(text, location, base_confidence, has_coordinates)
            .total()
    }

    pub fn factors(
        &self,
        text: &str,
        location: Option<&str>,
        base_confidence: f32,
        has_coordinates: bool,
    ) -> PriorityFactors {
        let lower = text.to_lowercase();
        let boost_if = |keywords: &[&str], boost: f32| {
            if contains_any(&lower, keywords) {
                boost
            } else {
                0.0
            }
        };

        let has_location_text = location.is_some_and(|l| !l.trim().is_empty());
        let location_boost = if has_coordinates {
            COORDINATES_BOOST
        } else if has_location_text {
            LOCATION_TEXT_BOOST
        } else {
            0.0
        };

        let base = if base_confidence.is_finite() {
            base_confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };

        PriorityFactors {
            base_confidence: base,
            urgency_boost: boost_if(&URGENCY_KEYWORDS[..], URGENCY_BOOST),
            disaster_type_boost: boost_if(&DISASTER_TYPE_KEYWORDS[..], DISASTER_TYPE_BOOST),
            location_boost,
            action_boost: boost_if(&ACTION_KEYWORDS[..], ACTION_BOOST),
        }
    }
}

fn contains_any(lower: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| lower.contains(*kw))
}
