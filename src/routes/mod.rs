use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

pub mod health;
pub mod jobs;
pub mod metrics;

/// Largest accepted upload.
pub const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

/// Gateway routes over the job store and work queue.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/jobs", post(jobs::submit_job).get(jobs::list_jobs))
        .route("/api/v1/jobs/{job_id}", get(jobs::get_job_status))
        .route("/api/v1/jobs/{job_id}/download", get(jobs::download_output))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}
