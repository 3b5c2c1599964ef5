//! Worker metrics reach a scrape listener. Lives in its own test binary
//! because the metrics recorder is process-global.
//!
//! Run with: cargo test --test metrics_test

mod helpers;

use helpers::*;
use media_squeeze::{services::worker, telemetry};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_worker_outcomes_are_scraped() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    telemetry::install_metrics_listener(addr).unwrap();
    worker::describe_metrics();

    let h = Harness::new();
    h.submit("photo.png", json!({})).await;
    h.submit("song.mp3", json!({})).await;
    h.worker("ok", Arc::new(Instant(true))).process_next().await.unwrap();
    h.worker("bad", Arc::new(Instant(false))).process_next().await.unwrap();

    // The listener starts in the background; give it a few tries.
    let mut body = String::new();
    for _ in 0..50 {
        if let Ok(response) = reqwest::get(format!("http://{addr}/metrics")).await {
            body = response.text().await.unwrap();
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    assert!(body.contains("compression_jobs_completed 1"), "{body}");
    assert!(body.contains("compression_jobs_failed 1"), "{body}");
    assert!(body.contains("compression_processing_seconds"), "{body}");
}
