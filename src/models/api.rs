use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::job::{CompressionJob, JobStatus};

/// Response after uploading a file for compression.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub file_name: String,
    pub message: String,
}

/// Response for querying job status.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub original_name: String,
    pub algorithm: String,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub media_type: Option<String>,
    pub message: Option<String>,
    pub download_url: Option<String>,
}

/// One row of the recent-jobs listing.
#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub file_name: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

impl From<CompressionJob> for JobSummary {
    fn from(job: CompressionJob) -> Self {
        Self {
            job_id: job.id,
            file_name: job.original_name,
            status: job.status,
            created_at: job.created_at,
        }
    }
}

impl From<CompressionJob> for JobStatusResponse {
    fn from(job: CompressionJob) -> Self {
        let download_url = (job.status == JobStatus::Finished)
            .then(|| format!("/api/v1/jobs/{}/download", job.id));

        Self {
            job_id: job.id,
            status: job.status,
            original_name: job.original_name,
            algorithm: job.algorithm,
            retry_count: job.retry_count,
            created_at: job.created_at,
            media_type: job.media_type,
            message: job.message,
            download_url,
        }
    }
}
