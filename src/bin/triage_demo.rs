//! Demo: search a handful of tweets, then stream for a few seconds and print
//! what lands in the cache. Runs in simulation mode unless credentials are set.

use std::sync::Arc;
use std::time::Duration;

use disaster_tweet_triage::cache::{SortOrder, TweetQuery};
use disaster_tweet_triage::scheduler::{BatchHandler, PollingScheduler, SessionConfig};
use disaster_tweet_triage::{config, IngestionCache, TriageService, TweetOrigin, TweetRecord};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    let cfg = config::load_config_default()?;
    let service = Arc::new(TriageService::from_config(&cfg)?);
    let status = service.status();
    println!(
        "mode={:?} api={} model_loaded={}",
        status.mode,
        status.api_type.as_str(),
        status.model_loaded
    );

    for t in service.search(None, 5, TweetOrigin::Manual).await {
        print_record(&t);
    }

    let secs: u64 = std::env::var("DEMO_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(6);
    let cache = Arc::new(IngestionCache::new());
    let both: Arc<dyn BatchHandler> = Arc::new(Tee {
        cache: cache.clone(),
    });

    let scheduler = PollingScheduler::new(service.clone());
    scheduler.start(
        SessionConfig {
            interval: Duration::from_secs(2),
            batch_size: 10,
        },
        both,
    );
    tokio::time::sleep(Duration::from_secs(secs)).await;
    if let Some(st) = scheduler.stop().await {
        println!("stopped after {} ticks, {} delivered", st.ticks, st.delivered);
    }

    let top = cache.query(&TweetQuery {
        sort: SortOrder::Priority,
        limit: Some(3),
        ..Default::default()
    });
    println!("top {}:", top.len());
    for t in &top {
        print_record(t);
    }

    println!("triage-demo done");
    Ok(())
}

/// Prints each tick, then forwards it to the cache.
struct Tee {
    cache: Arc<IngestionCache>,
}

impl BatchHandler for Tee {
    fn deliver(&self, batch: Vec<TweetRecord>) {
        println!("-- tick: {} disaster tweets", batch.len());
        self.cache.ingest(batch);
    }

    fn session_started(&self, cfg: &SessionConfig) {
        self.cache.session_started(cfg);
    }

    fn session_stopped(&self) {
        self.cache.session_stopped();
    }
}

fn print_record(t: &TweetRecord) {
    println!(
        "[{:>4.2}] {:<5} {:<16} {}",
        t.priority_score,
        if t.is_disaster { "ALERT" } else { "-" },
        t.location.as_deref().unwrap_or("?"),
        t.text
    );
}
