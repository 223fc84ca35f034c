// tests/cache_retention.rs
//
// Live window retention and id upserts on the ingestion cache.

use std::sync::Arc;
use std::thread;

use chrono::Utc;
use disaster_tweet_triage::cache::{Scope, SortOrder, TweetQuery};
use disaster_tweet_triage::classify::Classifier;
use disaster_tweet_triage::source::SimulationSource;
use disaster_tweet_triage::tweet::{Provider, PublicMetrics, RawTweet};
use disaster_tweet_triage::{IngestionCache, TriageService, TweetOrigin, TweetRecord};

fn svc() -> TriageService {
    TriageService::new(Classifier::keyword_only(), SimulationSource::seeded(99))
}

fn raw(id: &str, text: &str) -> RawTweet {
    RawTweet {
        id: id.to_string(),
        text: text.to_string(),
        created_at: Utc::now(),
        author_id: None,
        location: None,
        coordinates: None,
        public_metrics: PublicMetrics::default(),
        lang: "en".into(),
        user_verified: false,
        provider: Provider::Simulation,
    }
}

fn records(svc: &TriageService, range: std::ops::Range<usize>) -> Vec<TweetRecord> {
    range
        .map(|i| {
            let text = if i % 3 == 0 {
                "fire near the school"
            } else {
                "quiet afternoon"
            };
            svc.process(raw(&format!("t{i}"), text), TweetOrigin::Stream)
        })
        .collect()
}

#[test]
fn live_window_keeps_most_recent_hundred() {
    let svc = svc();
    let cache = IngestionCache::new();
    for start in (0..150).step_by(20) {
        cache.ingest(records(&svc, start..(start + 20).min(150)));
    }

    assert_eq!(cache.live_len(), 100);
    assert_eq!(cache.cached_len(), 150);

    let live = cache.query(&TweetQuery::default());
    assert_eq!(live.len(), 100);
    assert_eq!(live.first().map(|r| r.id.as_str()), Some("t50"));
    assert_eq!(live.last().map(|r| r.id.as_str()), Some("t149"));

    // evicted from the live window but still retrievable by id
    assert!(cache.get("t0").is_some());
    let everything = cache.query(&TweetQuery {
        scope: Scope::All,
        ..Default::default()
    });
    assert_eq!(everything.len(), 150);
}

#[test]
fn re_ingesting_an_id_keeps_one_latest_record() {
    let svc = svc();
    let cache = IngestionCache::new();
    cache.ingest(vec![svc.process(raw("dup", "calm lake"), TweetOrigin::Stream)]);
    cache.ingest(records(&svc, 0..5));
    cache.ingest(vec![svc.process(
        raw("dup", "URGENT flood evacuation"),
        TweetOrigin::Manual,
    )]);

    assert_eq!(cache.cached_len(), 6);
    let hit = cache.get("dup").expect("dup cached");
    assert!(hit.is_disaster);
    assert_eq!(hit.source, TweetOrigin::Manual);

    let live = cache.query(&TweetQuery::default());
    let dups: Vec<_> = live.iter().filter(|r| r.id == "dup").collect();
    assert_eq!(dups.len(), 1);
    assert_eq!(dups[0].text, "URGENT flood evacuation");
    assert_eq!(live.last().map(|r| r.id.as_str()), Some("dup"));
}

#[test]
fn top_priority_over_live_window_is_sorted_and_disaster_only() {
    let svc = svc();
    let cache = IngestionCache::new();
    cache.ingest(vec![
        svc.process(raw("a", "small fire"), TweetOrigin::Stream),
        svc.process(raw("b", "nice weather"), TweetOrigin::Stream),
        svc.process(
            raw("c", "BREAKING earthquake, rescue teams needed, emergency"),
            TweetOrigin::Stream,
        ),
        svc.process(raw("d", "storm warning"), TweetOrigin::Search),
    ]);

    let top = cache.query(&TweetQuery {
        disaster_only: true,
        sort: SortOrder::Priority,
        limit: Some(10),
        ..Default::default()
    });
    let ids: Vec<_> = top.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids.len(), 3);
    assert_eq!(ids[0], "c");
    assert!(top.windows(2).all(|w| w[0].priority_score >= w[1].priority_score));

    let searched = cache.query(&TweetQuery {
        origin: Some(TweetOrigin::Search),
        ..Default::default()
    });
    assert_eq!(searched.len(), 1);
}

#[test]
fn concurrent_ingest_never_exceeds_capacity() {
    let cache = Arc::new(IngestionCache::with_capacity(50));
    let handles: Vec<_> = (0..4)
        .map(|w| {
            let cache = cache.clone();
            thread::spawn(move || {
                let svc = svc();
                for round in 0..10 {
                    let start = w * 1000 + round * 10;
                    cache.ingest(records(&svc, start..start + 10));
                    assert!(cache.query(&TweetQuery::default()).len() <= 50);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("worker panicked");
    }

    assert_eq!(cache.live_len(), 50);
    assert_eq!(cache.cached_len(), 400);
    let stats = cache.stats();
    assert_eq!(stats.total_cached, 400);
    assert_eq!(stats.disaster_tweets + stats.normal_tweets, 400);
    assert_eq!(stats.last_hour, 400);
}
