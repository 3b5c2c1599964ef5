use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Lifecycle state of a compression job.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Finished,
    Failed,
}

impl JobStatus {
    /// Finished and failed jobs never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }
}

/// A compression job as stored in `compression_jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionJob {
    pub id: Uuid,
    pub original_name: String,
    pub status: JobStatus,
    pub algorithm: String,
    pub params: serde_json::Value,
    pub retry_count: i32,
    /// Fencing token, bumped on every claim.
    pub claim_generation: i64,
    pub heartbeat: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub output_path: Option<String>,
    pub media_type: Option<String>,
    pub message: Option<String>,
}

impl CompressionJob {
    /// Lowercased extension of the original file name, including the dot
    /// (e.g. `".png"`), or an empty string when there is none.
    pub fn extension(&self) -> String {
        extension_of(&self.original_name)
    }

    /// Name of the uploaded original inside the upload directory.
    pub fn upload_file_name(&self) -> String {
        upload_file_name(self.id, &self.original_name)
    }
}

pub fn extension_of(file_name: &str) -> String {
    std::path::Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_default()
}

/// Uploads are stored as `<job id><extension>` so workers can find them from
/// the job row alone.
pub fn upload_file_name(id: Uuid, original_name: &str) -> String {
    format!("{id}{}", extension_of(original_name))
}

/// Proof that a worker holds the current claim on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimToken {
    pub job_id: Uuid,
    pub generation: i64,
}

/// Result of trying to claim a dequeued job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed(ClaimToken),
    /// The row exists but is not `pending` (already claimed or terminal).
    NotClaimable(JobStatus),
    NotFound,
}

/// Result of the watchdog's atomic reclaim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimOutcome {
    /// Returned to `pending`; `retry_count` is the new value.
    Requeued { retry_count: i32 },
    PermanentlyFailed,
    /// The job was no longer overdue `in_progress` when the lock was taken.
    Skipped,
}

/// Result of a fenced terminal write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    Committed,
    /// The claim was lost to a reclaim or a newer claimant; nothing written.
    Fenced,
}

/// Terminal result a worker records for its claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub output_path: Option<String>,
    pub media_type: Option<String>,
    pub message: String,
}

impl JobOutcome {
    pub fn finished(output_path: String, media_type: String, message: String) -> Self {
        Self {
            status: JobStatus::Finished,
            output_path: Some(output_path),
            media_type: Some(media_type),
            message,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            output_path: None,
            media_type: None,
            message: message.into(),
        }
    }
}
