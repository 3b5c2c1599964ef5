use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{JobStatusResponse, JobSummary, SubmitResponse};
use crate::models::job::{extension_of, upload_file_name, JobStatus};
use crate::models::media::MediaKind;

/// POST /api/v1/jobs: Upload a file for compression.
///
/// The `file` field is required. `compressionType` selects the algorithm;
/// every other field is stored as a compression param.
pub async fn submit_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SubmitResponse>, StatusCode> {
    let mut upload: Option<(String, axum::body::Bytes)> = None;
    let mut algorithm: Option<String> = None;
    let mut params = serde_json::Map::new();

    while let Some(field) = multipart.next_field().await.map_err(|_| StatusCode::BAD_REQUEST)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == "file" {
            let file_name = field
                .file_name()
                .and_then(base_name)
                .ok_or(StatusCode::BAD_REQUEST)?;
            let data = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
            upload = Some((file_name, data));
        } else {
            let value = field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?;
            if name == "compressionType" {
                algorithm = Some(value);
            } else {
                params.insert(name, form_value(&value));
            }
        }
    }

    let (original_name, data) = upload.ok_or(StatusCode::BAD_REQUEST)?;
    let algorithm = algorithm
        .filter(|a| !a.trim().is_empty())
        .unwrap_or_else(|| MediaKind::from_extension(&extension_of(&original_name)).to_string());

    let job_id = state
        .store
        .create(&original_name, &algorithm, serde_json::Value::Object(params))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create job");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let input_path = state.upload_dir.join(upload_file_name(job_id, &original_name));
    if let Err(e) = tokio::fs::write(&input_path, &data).await {
        tracing::error!(job_id = %job_id, error = %e, "Failed to store upload");
        // Terminal and queryable rather than left for the sweeper to retry.
        if let Err(e) = state.store.set_status(job_id, JobStatus::Failed).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to mark job failed");
        }
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    if let Err(e) = state.queue.enqueue(job_id).await {
        // The row is durable; the watchdog's stranded sweep enqueues it later.
        tracing::warn!(job_id = %job_id, error = %e, "Enqueue failed, job left pending");
    }

    metrics::counter!("compression_jobs_total").increment(1);
    tracing::info!(job_id = %job_id, original_name = %original_name, algorithm = %algorithm, "Job submitted");

    Ok(Json(SubmitResponse {
        job_id,
        status: JobStatus::Pending,
        file_name: original_name,
        message: "File queued for compression".to_string(),
    }))
}

/// Most jobs a listing returns.
pub const MAX_LISTED_JOBS: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
}

/// GET /api/v1/jobs: Newest jobs first, `limit` capped at 100.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<JobSummary>>, StatusCode> {
    let limit = params.limit.unwrap_or(MAX_LISTED_JOBS).clamp(1, MAX_LISTED_JOBS);
    let jobs = state.store.list_recent(limit).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to list jobs");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(jobs.into_iter().map(JobSummary::from).collect()))
}

/// GET /api/v1/jobs/{job_id}: Check compression job status.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, StatusCode> {
    let job = state
        .store
        .get(job_id)
        .await
        .map_err(|e| {
            tracing::error!(job_id = %job_id, error = %e, "Failed to load job");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(job.into()))
}

/// GET /api/v1/jobs/{job_id}/download: Fetch the compressed output.
pub async fn download_output(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let job = state
        .store
        .get(job_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let output_path = match (job.status, job.output_path.as_deref()) {
        (JobStatus::Finished, Some(path)) => path.to_string(),
        _ => return Err(StatusCode::CONFLICT),
    };

    let file = tokio::fs::File::open(&output_path).await.map_err(|e| {
        tracing::error!(job_id = %job_id, path = %output_path, error = %e, "Output file unreadable");
        StatusCode::GONE
    })?;
    let length = file.metadata().await.map(|meta| meta.len()).ok();

    let stem = std::path::Path::new(&job.original_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("download")
        .replace('"', "_");
    let disposition = format!(
        "attachment; filename=\"{}{}\"",
        stem,
        extension_of(&output_path)
    );
    let media_type = job
        .media_type
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let mut response = (
        [
            (header::CONTENT_TYPE, media_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response();
    if let Some(length) = length {
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, header::HeaderValue::from(length));
    }
    Ok(response)
}

/// Last path component of a client-supplied file name.
fn base_name(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next()?.trim();
    (!name.is_empty() && name != "." && name != "..").then(|| name.to_string())
}

/// Form fields arrive as text; recover booleans and numbers.
fn form_value(raw: &str) -> serde_json::Value {
    match raw {
        "true" => return serde_json::Value::Bool(true),
        "false" => return serde_json::Value::Bool(false),
        _ => {}
    }
    if let Ok(int) = raw.parse::<i64>() {
        return int.into();
    }
    raw.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(serde_json::Value::Number)
        .unwrap_or_else(|| serde_json::Value::String(raw.to_string()))
}
