use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::warn;

/// The global recorder can only be installed once per process; later calls
/// (a second app in the same test binary) share the first handle.
static HANDLE: OnceCell<Option<PrometheusHandle>> = OnceCell::new();

#[derive(Clone)]
pub struct Metrics {
    pub handle: Option<PrometheusHandle>,
}

impl Metrics {
    /// Install the Prometheus recorder (once) and publish the cache capacity gauge.
    pub fn init(cache_capacity: usize) -> Self {
        let handle = HANDLE
            .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
                Ok(h) => Some(h),
                Err(e) => {
                    warn!(error = %e, "prometheus recorder not installed");
                    None
                }
            })
            .clone();

        describe_metrics();
        gauge!("ingest_cache_capacity").set(cache_capacity as f64);

        Self { handle }
    }

    pub fn render(&self) -> String {
        self.handle.as_ref().map(|h| h.render()).unwrap_or_default()
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let this = self.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let m = this.clone();
                async move { m.render() }
            }),
        )
    }
}

/// One-time metrics registration (so series carry help text on /metrics).
fn describe_metrics() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "triage_classified_total",
            "Texts classified, labelled by method."
        );
        describe_counter!(
            "triage_model_fallback_total",
            "Model predictions that failed and fell back to keywords."
        );
        describe_counter!("ingest_tweets_total", "Records written to the cache.");
        describe_counter!(
            "ingest_evicted_total",
            "Records dropped from the live window."
        );
        describe_gauge!("ingest_cache_live", "Records currently in the live window.");
        describe_gauge!("ingest_cache_capacity", "Live window capacity.");
        describe_gauge!("ingest_last_run_ts", "Unix ts of the last cache ingest.");
        describe_counter!("stream_ticks_total", "Polling iterations started.");
        describe_counter!("stream_errors_total", "Polling iterations that failed.");
        describe_counter!(
            "stream_delivered_total",
            "Disaster records handed to the batch handler."
        );
        describe_counter!("search_requests_total", "Successful provider searches.");
        describe_counter!("search_errors_total", "Failed provider searches.");
        describe_histogram!("search_latency_ms", "Provider search latency in milliseconds.");
    });
}
