// src/source/simulation.rs
//! Synthetic tweet generator used when no provider credentials are configured
//! (and as the streaming fallback when a live provider fails).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::TweetSource;
use crate::error::SourceError;
use crate::tweet::{Coordinates, Provider, PublicMetrics, RawTweet};

const SAMPLE_LOCATIONS: [(&str, f64, f64); 10] = [
    ("San Francisco, CA", 37.7749, -122.4194),
    ("Los Angeles, CA", 34.0522, -118.2437),
    ("New York, NY", 40.7128, -74.0060),
    ("Houston, TX", 29.7604, -95.3698),
    ("Chicago, IL", 41.8781, -87.6298),
    ("Miami, FL", 25.7617, -80.1918),
    ("Seattle, WA", 47.6062, -122.3321),
    ("Denver, CO", 39.7392, -104.9903),
    ("Atlanta, GA", 33.7490, -84.3880),
    ("Phoenix, AZ", 33.4484, -112.0740),
];

const DISASTER_TEMPLATES: [&str; 10] = [
    "URGENT: Major {kind} hits {place}, {action}!",
    "{kind} spreading rapidly near {place}, {action}",
    "Emergency: {kind} reported in {place}, {action}",
    "Breaking: {kind} warning issued for {place}",
    "{kind} spotted moving towards {place}",
    "ALERT: {kind} in {place}, emergency services responding",
    "Massive {kind} affecting {place} area",
    "{kind} evacuation ordered for {place}",
    "Critical: {kind} emergency in {place}",
    "Live: {kind} situation developing in {place}",
];

const DISASTER_KINDS: [&str; 10] = [
    "earthquake",
    "wildfire",
    "flood",
    "tornado",
    "hurricane",
    "building fire",
    "explosion",
    "storm",
    "landslide",
    "gas leak",
];

const ACTIONS: [&str; 12] = [
    "evacuations ordered",
    "buildings collapsing",
    "emergency services responding",
    "immediate evacuation needed",
    "roads blocked",
    "power outages reported",
    "water levels rising",
    "winds reaching dangerous speeds",
    "smoke visible",
    "residents advised to shelter",
    "multiple injuries reported",
    "rescue operations underway",
];

const NORMAL_TEMPLATES: [&str; 10] = [
    "Beautiful sunset tonight in {place}",
    "Great weather today in {place}",
    "Having lunch at a nice restaurant in {place}",
    "Traffic is moving well in {place} today",
    "Enjoying the weekend in {place}",
    "New coffee shop opened in {place}",
    "Concert was amazing last night in {place}",
    "Perfect day for a walk in {place}",
    "Local farmers market busy in {place}",
    "Sports game was exciting in {place}",
];

/// Share of a generated batch that is disaster-templated.
pub const BATCH_DISASTER_SHARE: f64 = 0.4;
/// Probability that a single unforced tweet is disaster-templated.
pub const SINGLE_DISASTER_PROBABILITY: f64 = 0.3;
const MAX_AGE_MINUTES: i64 = 60;

/// Ids embed a per-generator sequence number so a batch never repeats an id,
/// even when two tweets share the same second and random suffix.
pub struct SimulationSource {
    rng: Mutex<StdRng>,
    seq: AtomicU64,
}

impl SimulationSource {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Deterministic text/metadata for tests. Ids and timestamps still use the clock.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
            seq: AtomicU64::new(0),
        }
    }

    /// One tweet. `None` lets the generator decide (30% disaster).
    pub fn generate_one(&self, force_disaster: Option<bool>) -> RawTweet {
        let mut rng = self.rng.lock().expect("simulation rng poisoned");
        self.generate_with(&mut rng, force_disaster)
    }

    /// `max_results` tweets, 40% (rounded down) disaster-templated, shuffled.
    /// A batch of one would always round to zero, so it uses the single-tweet odds.
    pub fn generate_batch(&self, max_results: usize) -> Vec<RawTweet> {
        if max_results == 1 {
            return vec![self.generate_one(None)];
        }
        let disaster_count = (max_results as f64 * BATCH_DISASTER_SHARE) as usize;
        let mut rng = self.rng.lock().expect("simulation rng poisoned");
        let mut out: Vec<RawTweet> = (0..max_results)
            .map(|i| self.generate_with(&mut rng, Some(i < disaster_count)))
            .collect();
        out.shuffle(&mut *rng);
        out
    }

    fn generate_with(&self, rng: &mut StdRng, force_disaster: Option<bool>) -> RawTweet {
        let (place, lat, lon) = *pick(rng, &SAMPLE_LOCATIONS);
        let disaster =
            force_disaster.unwrap_or_else(|| rng.random_bool(SINGLE_DISASTER_PROBABILITY));

        let text = if disaster {
            pick(rng, &DISASTER_TEMPLATES)
                .replace("{kind}", *pick(rng, &DISASTER_KINDS))
                .replace("{place}", place)
                .replace("{action}", *pick(rng, &ACTIONS))
        } else {
            pick(rng, &NORMAL_TEMPLATES).replace("{place}", place)
        };

        let now = Utc::now();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let id = format!(
            "sim_{}_{}_{}",
            now.timestamp(),
            rng.random_range(1000..=9999),
            seq
        );

        RawTweet {
            id,
            text,
            created_at: now - Duration::minutes(rng.random_range(0..=MAX_AGE_MINUTES)),
            author_id: Some(format!("user_{}", rng.random_range(100_000..=999_999))),
            location: Some(place.to_string()),
            coordinates: Coordinates::checked(lat, lon),
            public_metrics: PublicMetrics {
                retweet_count: rng.random_range(0..=100),
                like_count: rng.random_range(0..=500),
                reply_count: rng.random_range(0..=50),
                quote_count: 0,
            },
            lang: "en".to_string(),
            user_verified: false,
            provider: Provider::Simulation,
        }
    }
}

impl Default for SimulationSource {
    fn default() -> Self {
        Self::new()
    }
}

fn pick<'a, T>(rng: &mut StdRng, items: &'a [T]) -> &'a T {
    &items[rng.random_range(0..items.len())]
}

#[async_trait]
impl TweetSource for SimulationSource {
    /// The query is ignored; simulated content is always disaster-themed or mundane.
    async fn fetch(&self, _query: &str, max_results: usize) -> Result<Vec<RawTweet>, SourceError> {
        Ok(self.generate_batch(max_results))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::classify::count_keywords;

    fn is_disaster_template(text: &str) -> bool {
        !NORMAL_TEMPLATES.iter().any(|t| {
            let (head, tail) = t.split_once("{place}").unwrap_or((t, ""));
            text.starts_with(head) && text.ends_with(tail)
        })
    }

    #[test]
    fn batch_has_forty_percent_disasters_and_unique_ids() {
        let sim = SimulationSource::seeded(7);
        let batch = sim.generate_batch(20);
        assert_eq!(batch.len(), 20);
        let disasters = batch.iter().filter(|t| is_disaster_template(&t.text)).count();
        assert_eq!(disasters, 8);
        let ids: HashSet<_> = batch.iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids.len(), 20);
    }

    #[test]
    fn small_batches_round_down() {
        let sim = SimulationSource::seeded(1);
        let batch = sim.generate_batch(2);
        assert_eq!(batch.iter().filter(|t| is_disaster_template(&t.text)).count(), 0);
        assert!(sim.generate_batch(0).is_empty());
    }

    #[test]
    fn metadata_is_within_documented_ranges() {
        let sim = SimulationSource::seeded(42);
        let now = Utc::now();
        for t in sim.generate_batch(50) {
            assert!(t.id.starts_with("sim_"));
            assert!(t.simulated());
            let author = t.author_id.as_deref().unwrap();
            assert!(author.starts_with("user_") && author.len() == 11);
            assert!(t.created_at <= now + Duration::seconds(1));
            assert!(t.created_at >= now - Duration::minutes(61));
            assert!(t.public_metrics.retweet_count <= 100);
            assert!(t.public_metrics.like_count <= 500);
            assert!(t.public_metrics.reply_count <= 50);
            let c = t.coordinates.unwrap();
            assert!(SAMPLE_LOCATIONS
                .iter()
                .any(|(name, lat, lon)| Some(*name) == t.location.as_deref()
                    && (*lat, *lon) == (c.lat, c.lon)));
        }
    }

    #[test]
    fn forced_disaster_text_is_filled_in() {
        let sim = SimulationSource::seeded(3);
        for _ in 0..20 {
            let t = sim.generate_one(Some(true));
            assert!(!t.text.contains('{'), "unfilled template: {}", t.text);
            assert!(is_disaster_template(&t.text));
        }
        let calm = sim.generate_one(Some(false));
        assert_eq!(count_keywords(&calm.text), 0);
    }

    #[test]
    fn single_tweet_batches_can_be_disasters() {
        let sim = SimulationSource::seeded(5);
        let disasters = (0..200)
            .map(|_| sim.generate_batch(1))
            .inspect(|b| assert_eq!(b.len(), 1))
            .filter(|b| is_disaster_template(&b[0].text))
            .count();
        // 30% odds per tweet
        assert!((20..=100).contains(&disasters), "{disasters}");
    }

    #[test]
    fn same_seed_same_text() {
        let a = SimulationSource::seeded(99).generate_batch(10);
        let b = SimulationSource::seeded(99).generate_batch(10);
        let ta: Vec<_> = a.iter().map(|t| t.text.as_str()).collect();
        let tb: Vec<_> = b.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(ta, tb);
    }
}
