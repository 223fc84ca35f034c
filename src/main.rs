//! Disaster Tweet Triage: binary entrypoint.
//! Boots the Axum HTTP server with the triage service, cache and polling loop.

use disaster_tweet_triage::{build_app, config, TriageConfig};
use shuttle_axum::ShuttleAxum;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs, filtered by `RUST_LOG` when set. A subscriber installed by
/// the host runtime takes precedence.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("disaster_tweet_triage=info,warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = match config::load_config_default() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(error = %e, "config not loaded, using defaults");
            let mut cfg = TriageConfig::default();
            config::apply_overrides(&mut cfg, |k| std::env::var(k).ok());
            cfg
        }
    };

    let router = build_app(&cfg);
    Ok(router.into())
}
