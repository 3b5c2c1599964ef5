//! HTTP gateway over the in-process backends, driven with a real client.
//!
//! Run with: cargo test --test gateway_test

mod helpers;

use helpers::*;
use media_squeeze::{
    app_state::AppState,
    db::JobStore,
    models::job::JobStatus,
    routes,
    services::worker::Processed,
};
use reqwest::{multipart, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: Uuid,
    status: String,
    file_name: String,
}

#[derive(Debug, Deserialize)]
struct JobStatusResponse {
    job_id: Uuid,
    status: String,
    retry_count: i32,
    media_type: Option<String>,
    download_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobSummary {
    job_id: Uuid,
    file_name: String,
    status: String,
}

/// Serve the gateway on an ephemeral port and return its base URL.
async fn spawn_gateway(h: &Harness) -> String {
    let state = AppState::new(h.store.clone(), h.queue.clone(), h.upload_dir());
    let app = routes::api_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}")
}

fn upload_form(file_name: &str) -> multipart::Form {
    multipart::Form::new().part(
        "file",
        multipart::Part::bytes(b"raw pixels".to_vec()).file_name(file_name.to_string()),
    )
}

#[tokio::test]
async fn test_submit_process_and_download() {
    let h = Harness::new();
    let base_url = spawn_gateway(&h).await;
    let client = reqwest::Client::new();

    let form = upload_form("holiday.png").text("compressionLevel", "7");
    let response = client
        .post(format!("{base_url}/api/v1/jobs"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let submitted: SubmitResponse = response.json().await.unwrap();
    assert_eq!(submitted.status, "pending");
    assert_eq!(submitted.file_name, "holiday.png");

    let id = submitted.job_id;
    let job = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(job.algorithm, "image");
    assert_eq!(job.params["compressionLevel"], 7);
    assert_eq!(h.queue.snapshot(), vec![id]);
    assert_eq!(
        std::fs::read(h.input_path(id, "holiday.png")).unwrap(),
        b"raw pixels"
    );

    // Not downloadable until finished.
    let early = client
        .get(format!("{base_url}/api/v1/jobs/{id}/download"))
        .send()
        .await
        .unwrap();
    assert_eq!(early.status(), StatusCode::CONFLICT);

    let worker = h.worker("w1", Arc::new(Instant(true)));
    assert_eq!(
        worker.process_next().await.unwrap(),
        Processed::Completed { job_id: id, status: JobStatus::Finished }
    );

    let status: JobStatusResponse = client
        .get(format!("{base_url}/api/v1/jobs/{id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status.job_id, id);
    assert_eq!(status.status, "finished");
    assert_eq!(status.retry_count, 0);
    assert_eq!(status.media_type.as_deref(), Some("image/png"));
    let download_url = status.download_url.expect("finished job has a download url");

    let download = client
        .get(format!("{base_url}{download_url}"))
        .send()
        .await
        .unwrap();
    assert_eq!(download.status(), StatusCode::OK);
    assert_eq!(
        download.headers()["content-length"],
        OUTPUT_BYTES.len().to_string().as_str()
    );
    assert_eq!(
        download.headers()["content-disposition"],
        "attachment; filename=\"holiday.png\""
    );
    assert_eq!(download.bytes().await.unwrap().as_ref(), OUTPUT_BYTES);
}

#[tokio::test]
async fn test_explicit_compression_type_is_recorded() {
    let h = Harness::new();
    let base_url = spawn_gateway(&h).await;

    let form = upload_form("notes.txt").text("compressionType", "zip");
    let submitted: SubmitResponse = reqwest::Client::new()
        .post(format!("{base_url}/api/v1/jobs"))
        .multipart(form)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let job = h.store.get(submitted.job_id).await.unwrap().unwrap();
    assert_eq!(job.algorithm, "zip");
    assert!(job.params.get("compressionType").is_none());
}

#[tokio::test]
async fn test_submit_without_file_is_rejected() {
    let h = Harness::new();
    let base_url = spawn_gateway(&h).await;

    let form = multipart::Form::new().text("compressionLevel", "3");
    let response = reqwest::Client::new()
        .post(format!("{base_url}/api/v1/jobs"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(h.queue.snapshot().is_empty());
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let h = Harness::new();
    let base_url = spawn_gateway(&h).await;
    let client = reqwest::Client::new();
    let id = Uuid::new_v4();

    for path in [format!("/api/v1/jobs/{id}"), format!("/api/v1/jobs/{id}/download")] {
        let response = client.get(format!("{base_url}{path}")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{path}");
    }
}

#[tokio::test]
async fn test_health_reports_backends() {
    let h = Harness::new();
    let base_url = spawn_gateway(&h).await;

    let response = reqwest::get(format!("{base_url}/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["checks"]["database"]["status"], "ok");
    assert_eq!(body["checks"]["redis"]["status"], "ok");
}

#[tokio::test]
async fn test_recent_jobs_are_listed_newest_first() {
    let h = Harness::new();
    let base_url = spawn_gateway(&h).await;
    let client = reqwest::Client::new();

    let first = h.submit("first.wav", serde_json::json!({})).await;
    h.store.advance(std::time::Duration::from_secs(1));
    let second = h.submit("second.mp4", serde_json::json!({})).await;
    h.worker("w1", Arc::new(Instant(true))).process_next().await.unwrap();

    let listed: Vec<JobSummary> = client
        .get(format!("{base_url}/api/v1/jobs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].job_id, second);
    assert_eq!(listed[0].file_name, "second.mp4");
    assert_eq!(listed[0].status, "pending");
    assert_eq!(listed[1].job_id, first);
    assert_eq!(listed[1].status, "finished");

    let limited: Vec<JobSummary> = client
        .get(format!("{base_url}/api/v1/jobs?limit=1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].job_id, second);
}
