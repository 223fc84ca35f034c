// src/scheduler.rs
//! Polling scheduler: one background task that fetches a batch, hands the
//! disaster-positive records to a handler, then sleeps for the interval.
//!
//! At most one loop runs per scheduler. `stop` signals the loop through a
//! `watch` channel (which also cuts the sleep short), waits up to the stop
//! timeout, and aborts the task if it is still inside a fetch.
//!
//! The handler's session hooks run under the scheduler lock, so concurrent
//! start/stop calls see them in the same order as the loop transitions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::IngestionCache;
use crate::error::TriageError;
use crate::tweet::TweetRecord;

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Where each tick's batch comes from.
#[async_trait]
pub trait BatchSource: Send + Sync {
    async fn next_batch(&self, max: usize) -> Result<Vec<TweetRecord>, TriageError>;
}

/// Receives the non-empty, disaster-only batch of each tick.
pub trait BatchHandler: Send + Sync {
    fn deliver(&self, batch: Vec<TweetRecord>);

    /// Called once per accepted `start`, before the first tick.
    fn session_started(&self, _cfg: &SessionConfig) {}

    /// Called once per `stop` that ended a session.
    fn session_stopped(&self) {}
}

impl BatchHandler for IngestionCache {
    fn deliver(&self, batch: Vec<TweetRecord>) {
        self.ingest(batch);
    }

    fn session_started(&self, cfg: &SessionConfig) {
        self.begin_session(cfg.interval.as_secs());
    }

    fn session_stopped(&self) {
        self.end_session();
    }
}

impl<F> BatchHandler for F
where
    F: Fn(Vec<TweetRecord>) + Send + Sync,
{
    fn deliver(&self, batch: Vec<TweetRecord>) {
        self(batch)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub interval: Duration,
    pub batch_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub interval_secs: Option<f64>,
    pub batch_size: Option<usize>,
    pub started_at: Option<DateTime<Utc>>,
    pub ticks: u64,
    pub delivered: u64,
    pub errors: u64,
}

impl SchedulerStatus {
    fn idle() -> Self {
        Self {
            running: false,
            interval_secs: None,
            batch_size: None,
            started_at: None,
            ticks: 0,
            delivered: 0,
            errors: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Started(SchedulerStatus),
    /// A loop was already running; nothing changed.
    AlreadyRunning(SchedulerStatus),
}

#[derive(Debug, Default)]
struct Counters {
    ticks: AtomicU64,
    delivered: AtomicU64,
    errors: AtomicU64,
}

struct Session {
    cfg: SessionConfig,
    started_at: DateTime<Utc>,
    counters: Arc<Counters>,
    handler: Arc<dyn BatchHandler>,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Session {
    fn status(&self, running: bool) -> SchedulerStatus {
        SchedulerStatus {
            running,
            interval_secs: Some(self.cfg.interval.as_secs_f64()),
            batch_size: Some(self.cfg.batch_size),
            started_at: Some(self.started_at),
            ticks: self.counters.ticks.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }
}

enum State {
    Idle,
    Running(Session),
}

pub struct PollingScheduler {
    source: Arc<dyn BatchSource>,
    stop_timeout: Duration,
    state: Mutex<State>,
}

impl PollingScheduler {
    pub fn new(source: Arc<dyn BatchSource>) -> Self {
        Self {
            source,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            state: Mutex::new(State::Idle),
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Spawn the loop on the current tokio runtime. Idempotent while running.
    pub fn start(&self, cfg: SessionConfig, handler: Arc<dyn BatchHandler>) -> StartOutcome {
        let mut state = self.state.lock().expect("scheduler mutex poisoned");
        if let State::Running(session) = &*state {
            if !session.handle.is_finished() {
                return StartOutcome::AlreadyRunning(session.status(true));
            }
        }

        handler.session_started(&cfg);
        let (stop_tx, stop_rx) = watch::channel(false);
        let counters = Arc::new(Counters::default());
        let handle = tokio::spawn(run_loop(
            self.source.clone(),
            handler.clone(),
            cfg,
            stop_rx,
            counters.clone(),
        ));
        let session = Session {
            cfg,
            started_at: Utc::now(),
            counters,
            handler,
            stop_tx,
            handle,
        };
        let status = session.status(true);
        *state = State::Running(session);

        info!(
            target: "stream",
            interval_ms = cfg.interval.as_millis() as u64,
            batch_size = cfg.batch_size,
            "polling loop started"
        );
        StartOutcome::Started(status)
    }

    /// Signal the loop and wait for it; reports stopped even if it had to be aborted.
    /// `None` when no session was running.
    pub async fn stop(&self) -> Option<SchedulerStatus> {
        let session = {
            let mut state = self.state.lock().expect("scheduler mutex poisoned");
            let session = match std::mem::replace(&mut *state, State::Idle) {
                State::Running(s) => s,
                State::Idle => return None,
            };
            let _ = session.stop_tx.send(true);
            session.handler.session_stopped();
            session
        };

        let mut handle = session.handle;
        match tokio::time::timeout(self.stop_timeout, &mut handle).await {
            Ok(Ok(())) => info!(target: "stream", "polling loop stopped"),
            Ok(Err(e)) => warn!(target: "stream", error = %e, "polling loop ended abnormally"),
            Err(_) => {
                warn!(
                    target: "stream",
                    timeout_ms = self.stop_timeout.as_millis() as u64,
                    "polling loop did not exit in time, aborting"
                );
                handle.abort();
            }
        }

        Some(SchedulerStatus {
            running: false,
            interval_secs: Some(session.cfg.interval.as_secs_f64()),
            batch_size: Some(session.cfg.batch_size),
            started_at: Some(session.started_at),
            ticks: session.counters.ticks.load(Ordering::Relaxed),
            delivered: session.counters.delivered.load(Ordering::Relaxed),
            errors: session.counters.errors.load(Ordering::Relaxed),
        })
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.state.lock().expect("scheduler mutex poisoned");
        match &*state {
            State::Running(s) => s.status(!s.handle.is_finished()),
            State::Idle => SchedulerStatus::idle(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status().running
    }
}

async fn run_loop(
    source: Arc<dyn BatchSource>,
    handler: Arc<dyn BatchHandler>,
    cfg: SessionConfig,
    mut stop_rx: watch::Receiver<bool>,
    counters: Arc<Counters>,
) {
    loop {
        if *stop_rx.borrow() {
            break;
        }
        counters.ticks.fetch_add(1, Ordering::Relaxed);
        counter!("stream_ticks_total").increment(1);

        match source.next_batch(cfg.batch_size).await {
            // a stopped session no longer owns the handler
            Ok(_) if *stop_rx.borrow() => break,
            Ok(batch) => {
                let fetched = batch.len();
                let disasters: Vec<TweetRecord> =
                    batch.into_iter().filter(|t| t.is_disaster).collect();
                let n = disasters.len();
                if n > 0 {
                    counters.delivered.fetch_add(n as u64, Ordering::Relaxed);
                    counter!("stream_delivered_total").increment(n as u64);
                    handler.deliver(disasters);
                }
                info!(target: "stream", fetched, delivered = n, "polling tick");
            }
            Err(e) => {
                counters.errors.fetch_add(1, Ordering::Relaxed);
                counter!("stream_errors_total").increment(1);
                warn!(target: "stream", error = %e, "polling tick failed, retrying next interval");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(cfg.interval) => {}
            _ = stop_rx.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::record;
    use std::sync::atomic::AtomicUsize;

    struct Scripted {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BatchSource for Scripted {
        async fn next_batch(&self, _max: usize) -> Result<Vec<TweetRecord>, TriageError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(TriageError::Unavailable("first call fails".into()))
            } else {
                Ok(vec![
                    record(&format!("d{n}"), 0.7, true),
                    record(&format!("n{n}"), 0.3, false),
                ])
            }
        }
    }

    fn cfg(ms: u64) -> SessionConfig {
        SessionConfig {
            interval: Duration::from_millis(ms),
            batch_size: 5,
        }
    }

    #[tokio::test]
    async fn error_tick_does_not_end_the_loop() {
        let sched = PollingScheduler::new(Arc::new(Scripted {
            calls: AtomicUsize::new(0),
        }));
        let cache = Arc::new(IngestionCache::new());
        assert!(matches!(
            sched.start(cfg(10), cache.clone()),
            StartOutcome::Started(_)
        ));
        tokio::time::sleep(Duration::from_millis(120)).await;
        let st = sched.stop().await.expect("was running");

        assert!(!st.running);
        assert_eq!(st.errors, 1);
        assert!(st.ticks >= 2);
        // only disaster records reach the handler
        assert!(cache.cached_len() >= 1);
        assert!(cache
            .query(&Default::default())
            .iter()
            .all(|r| r.is_disaster));
    }

    #[tokio::test]
    async fn second_start_is_a_no_op() {
        let sched = PollingScheduler::new(Arc::new(Scripted {
            calls: AtomicUsize::new(1),
        }));
        let handler: Arc<dyn BatchHandler> = Arc::new(|_b: Vec<TweetRecord>| {});
        assert!(matches!(sched.start(cfg(50), handler.clone()), StartOutcome::Started(_)));
        assert!(matches!(
            sched.start(cfg(50), handler),
            StartOutcome::AlreadyRunning(_)
        ));
        assert!(sched.is_running());
        assert!(sched.stop().await.is_some());
        assert!(!sched.is_running());
        // stopping again is harmless
        assert!(sched.stop().await.is_none());
    }

    #[tokio::test]
    async fn stop_cuts_the_sleep_short() {
        let sched = PollingScheduler::new(Arc::new(Scripted {
            calls: AtomicUsize::new(1),
        }));
        let handler: Arc<dyn BatchHandler> = Arc::new(|_b: Vec<TweetRecord>| {});
        sched.start(cfg(60_000), handler);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let t0 = std::time::Instant::now();
        let st = sched.stop().await.expect("was running");
        assert!(t0.elapsed() < Duration::from_secs(2));
        assert_eq!(st.ticks, 1);
    }

    #[derive(Default)]
    struct Hooks {
        started: AtomicUsize,
        stopped: AtomicUsize,
    }

    impl BatchHandler for Hooks {
        fn deliver(&self, _batch: Vec<TweetRecord>) {}

        fn session_started(&self, cfg: &SessionConfig) {
            assert_eq!(cfg.batch_size, 5);
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn session_stopped(&self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn hooks_fire_once_per_transition() {
        let sched = PollingScheduler::new(Arc::new(Scripted {
            calls: AtomicUsize::new(1),
        }));
        let hooks = Arc::new(Hooks::default());
        sched.start(cfg(50), hooks.clone());
        sched.start(cfg(50), hooks.clone());
        assert_eq!(hooks.started.load(Ordering::SeqCst), 1);

        sched.stop().await;
        sched.stop().await;
        assert_eq!(hooks.stopped.load(Ordering::SeqCst), 1);

        sched.start(cfg(50), hooks.clone());
        sched.stop().await;
        assert_eq!(hooks.started.load(Ordering::SeqCst), 2);
        assert_eq!(hooks.stopped.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cache_session_follows_the_scheduler() {
        let sched = PollingScheduler::new(Arc::new(Scripted {
            calls: AtomicUsize::new(1),
        }));
        let cache = Arc::new(IngestionCache::new());
        sched.start(
            SessionConfig {
                interval: Duration::from_secs(3),
                batch_size: 5,
            },
            cache.clone(),
        );
        let live = cache.streaming_state();
        assert!(live.active);
        assert_eq!(live.interval_secs, 3);

        sched.stop().await;
        let done = cache.streaming_state();
        assert!(!done.active);
        assert!(done.stopped_at.is_some());
    }
}
