// tests/metrics.rs
use axum::body::{self, Body};
use http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use disaster_tweet_triage::{build_app, TriageConfig};

// Full in-process app with /metrics merged in; default config runs in simulation.
fn app() -> Router {
    build_app(&TriageConfig::default())
}

async fn body_text(app: &Router, req: Request<Body>) -> (StatusCode, String) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    // axum::body::to_bytes requires an explicit limit
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn metrics_endpoint_exposes_triage_series() {
    let app = app();

    // drive classification + ingestion so the counters have samples
    let (status, _) = body_text(
        &app,
        Request::post("/predict")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"text":"flood warning downtown"}"#))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = body_text(
        &app,
        Request::post("/tweets/ingest?count=20")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, text) = body_text(&app, Request::get("/metrics").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);

    for needle in [
        "triage_classified_total",
        "ingest_tweets_total",
        "ingest_cache_live",
        "ingest_cache_capacity",
        "ingest_last_run_ts",
    ] {
        assert!(
            text.contains(needle),
            "missing metric `{}` in /metrics output:\n{}",
            needle,
            text
        );
    }
    assert!(text.contains(r#"method="keyword_matching""#));
}

#[tokio::test]
async fn second_app_in_same_process_still_serves_metrics() {
    let first = app();
    let second = app();

    for app in [&first, &second] {
        let (status, text) =
            body_text(app, Request::get("/metrics").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(text.contains("ingest_cache_capacity"));
    }
}
