// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod geo;
pub mod metrics;
pub mod priority;
pub mod scheduler;
pub mod service;
pub mod source;
pub mod tweet;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::cache::IngestionCache;
pub use crate::classify::Classifier;
pub use crate::config::TriageConfig;
pub use crate::error::{ModelError, SourceError, TriageError};
pub use crate::service::TriageService;
pub use crate::tweet::{RawTweet, TweetOrigin, TweetRecord};

use axum::Router;
use tracing::{info, warn};

/// Build the full app for `cfg`: API routes, `/metrics`, and (if configured)
/// an already running streaming loop.
pub fn build_app(cfg: &TriageConfig) -> Router {
    let metrics = crate::metrics::Metrics::init(cfg.cache.capacity);
    let state = AppState::from_config(cfg);

    if cfg.streaming.autostart {
        match state.start_streaming(None, None) {
            Ok(_) => info!(
                target: "stream",
                interval_secs = cfg.streaming.interval_secs,
                "streaming autostarted"
            ),
            Err(e) => warn!(target: "stream", error = %e, "streaming autostart skipped"),
        }
    }

    router(state).merge(metrics.router())
}

/// Load config from the default locations (file + env) and build the app.
pub async fn app() -> anyhow::Result<Router> {
    let cfg = config::load_config_default()?;
    Ok(build_app(&cfg))
}
