//! # Ingestion Cache
//! Bounded live window plus an unbounded id → record lookup map.
//!
//! - `ingest` appends a batch to the live window, upserts every record into
//!   the map (latest ingestion wins), then drops the oldest window entries
//!   beyond capacity. The whole batch is applied under one lock, so readers
//!   never see half of it.
//! - `query` filters, sorts and limits over the live window or the whole map,
//!   always returning the latest value for each id.
//! - `StreamingState` lives here because every ingest updates it.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::tweet::{TweetOrigin, TweetRecord};

pub const DEFAULT_CAPACITY: usize = 100;

/// Which records a query looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Only the bounded live window.
    #[default]
    Live,
    /// Everything ever ingested (the lookup map).
    All,
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(Scope::Live),
            "cache" | "all" => Ok(Scope::All),
            other => Err(format!("unknown source '{other}', expected live|cache|all")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Ingestion order, oldest first. `limit` keeps the most recent N.
    #[default]
    Ingestion,
    /// Priority descending; ties keep ingestion order.
    Priority,
}

#[derive(Debug, Clone, Default)]
pub struct TweetQuery {
    pub scope: Scope,
    pub disaster_only: bool,
    pub min_priority: Option<f32>,
    pub origin: Option<TweetOrigin>,
    pub sort: SortOrder,
    pub limit: Option<usize>,
}

impl TweetQuery {
    fn accepts(&self, r: &TweetRecord) -> bool {
        (!self.disaster_only || r.is_disaster)
            && self.min_priority.map_or(true, |p| r.priority_score >= p)
            && self.origin.map_or(true, |o| r.source == o)
    }
}

/// Streaming session bookkeeping, reported by status endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamingState {
    pub active: bool,
    pub interval_secs: u64,
    pub last_update_at: Option<DateTime<Utc>>,
    /// Records ingested since the current (or last) session started.
    pub total_processed: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl Default for StreamingState {
    fn default() -> Self {
        Self {
            active: false,
            interval_secs: 30,
            last_update_at: None,
            total_processed: 0,
            started_at: None,
            stopped_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PriorityDistribution {
    /// >= 0.9
    pub critical: usize,
    /// [0.7, 0.9)
    pub high: usize,
    /// [0.5, 0.7)
    pub medium: usize,
    /// < 0.5
    pub low: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct CacheStats {
    pub total_cached: usize,
    pub disaster_tweets: usize,
    pub normal_tweets: usize,
    pub live_tweets: usize,
    pub capacity: usize,
    /// Records ingested during the last hour.
    pub last_hour: usize,
    pub last_hour_disaster_rate: f32,
    /// Disaster records in the live window, bucketed by priority.
    pub priority_distribution: PriorityDistribution,
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    ingested_at: DateTime<Utc>,
    record: TweetRecord,
}

#[derive(Debug)]
struct Inner {
    live: VecDeque<(u64, TweetRecord)>,
    by_id: HashMap<String, Entry>,
    next_seq: u64,
    stream: StreamingState,
}

#[derive(Debug)]
pub struct IngestionCache {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl IngestionCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                live: VecDeque::with_capacity(capacity + 1),
                by_id: HashMap::new(),
                next_seq: 0,
                stream: StreamingState::default(),
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append, upsert, truncate. An empty batch is a no-op.
    pub fn ingest(&self, batch: Vec<TweetRecord>) {
        if batch.is_empty() {
            return;
        }
        let now = Utc::now();
        let n = batch.len();

        let mut inner = self.inner.lock().expect("ingestion cache mutex poisoned");
        for record in batch {
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.live.push_back((seq, record.clone()));
            inner.by_id.insert(
                record.id.clone(),
                Entry {
                    seq,
                    ingested_at: now,
                    record,
                },
            );
        }
        let evicted = inner.live.len().saturating_sub(self.capacity);
        inner.live.drain(..evicted);
        inner.stream.last_update_at = Some(now);
        inner.stream.total_processed += n as u64;
        let live = inner.live.len();
        drop(inner);

        counter!("ingest_tweets_total").increment(n as u64);
        counter!("ingest_evicted_total").increment(evicted as u64);
        gauge!("ingest_cache_live").set(live as f64);
        gauge!("ingest_last_run_ts").set(now.timestamp() as f64);
        debug!(target: "ingest", batch = n, evicted, live, "batch ingested");
    }

    pub fn query(&self, q: &TweetQuery) -> Vec<TweetRecord> {
        let inner = self.inner.lock().expect("ingestion cache mutex poisoned");

        // (seq, record) in ingestion order, one entry per id, latest value
        let mut rows: Vec<(u64, &TweetRecord)> = match q.scope {
            Scope::Live => inner
                .live
                .iter()
                .filter_map(|(seq, r)| {
                    let latest = inner.by_id.get(&r.id)?;
                    (latest.seq == *seq).then_some((*seq, &latest.record))
                })
                .collect(),
            Scope::All => {
                let mut v: Vec<_> = inner.by_id.values().map(|e| (e.seq, &e.record)).collect();
                v.sort_by_key(|(seq, _)| *seq);
                v
            }
        };
        rows.retain(|(_, r)| q.accepts(r));

        match q.sort {
            SortOrder::Ingestion => {
                if let Some(limit) = q.limit {
                    let skip = rows.len().saturating_sub(limit);
                    rows.drain(..skip);
                }
            }
            SortOrder::Priority => {
                // Vec::sort_by is stable
                rows.sort_by(|(_, a), (_, b)| {
                    b.priority_score
                        .partial_cmp(&a.priority_score)
                        .unwrap_or(Ordering::Equal)
                });
                truncate(&mut rows, q.limit);
            }
        }

        rows.into_iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn get(&self, id: &str) -> Option<TweetRecord> {
        let inner = self.inner.lock().expect("ingestion cache mutex poisoned");
        inner.by_id.get(id).map(|e| e.record.clone())
    }

    pub fn live_len(&self) -> usize {
        self.inner
            .lock()
            .expect("ingestion cache mutex poisoned")
            .live
            .len()
    }

    pub fn cached_len(&self) -> usize {
        self.inner
            .lock()
            .expect("ingestion cache mutex poisoned")
            .by_id
            .len()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("ingestion cache mutex poisoned");
        let cutoff = Utc::now() - Duration::hours(1);

        let total_cached = inner.by_id.len();
        let disaster_tweets = inner.by_id.values().filter(|e| e.record.is_disaster).count();
        let recent: Vec<&Entry> = inner
            .by_id
            .values()
            .filter(|e| e.ingested_at >= cutoff)
            .collect();
        let recent_disasters = recent.iter().filter(|e| e.record.is_disaster).count();
        let last_hour_disaster_rate = if recent.is_empty() {
            0.0
        } else {
            recent_disasters as f32 / recent.len() as f32
        };

        let mut dist = PriorityDistribution::default();
        for (seq, r) in inner.live.iter() {
            let is_latest = inner.by_id.get(&r.id).is_some_and(|e| e.seq == *seq);
            if !is_latest || !r.is_disaster {
                continue;
            }
            match r.priority_score {
                p if p >= 0.9 => dist.critical += 1,
                p if p >= 0.7 => dist.high += 1,
                p if p >= 0.5 => dist.medium += 1,
                _ => dist.low += 1,
            }
        }

        CacheStats {
            total_cached,
            disaster_tweets,
            normal_tweets: total_cached - disaster_tweets,
            live_tweets: inner.live.len(),
            capacity: self.capacity,
            last_hour: recent.len(),
            last_hour_disaster_rate,
            priority_distribution: dist,
        }
    }

    pub fn streaming_state(&self) -> StreamingState {
        self.inner
            .lock()
            .expect("ingestion cache mutex poisoned")
            .stream
            .clone()
    }

    /// Mark a streaming session as started; resets the per-session counter.
    pub fn begin_session(&self, interval_secs: u64) {
        let mut inner = self.inner.lock().expect("ingestion cache mutex poisoned");
        let s = &mut inner.stream;
        s.active = true;
        s.interval_secs = interval_secs;
        s.total_processed = 0;
        s.started_at = Some(Utc::now());
        s.stopped_at = None;
    }

    /// Mark the session as stopped. Counters stay readable until the next start.
    pub fn end_session(&self) {
        let mut inner = self.inner.lock().expect("ingestion cache mutex poisoned");
        if inner.stream.active {
            inner.stream.active = false;
            inner.stream.stopped_at = Some(Utc::now());
        }
    }
}

impl Default for IngestionCache {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate<T>(rows: &mut Vec<T>, limit: Option<usize>) {
    if let Some(limit) = limit {
        rows.truncate(limit);
    }
}
