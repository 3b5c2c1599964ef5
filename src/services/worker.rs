//! Worker loop: dequeue an id, claim the job, transcode, report.
//!
//! A worker never retries a job itself. Anything that stalls at
//! `in_progress` is the watchdog's to reclaim.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{sleep, MissedTickBehavior};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::{JobStore, StoreError};
use crate::models::job::{
    ClaimOutcome, ClaimToken, CompletionOutcome, CompressionJob, JobOutcome, JobStatus,
};
use crate::models::media::MediaKind;
use crate::models::params::MediaOptions;
use crate::services::queue::{QueueError, WorkQueue};
use crate::services::transcoder::{TranscodeError, TranscodeReport, TranscodeRequest, Transcoder};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    pub heartbeat_interval: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            upload_dir: config.upload_dir.clone(),
            output_dir: config.output_dir.clone(),
            poll_interval: config.poll_interval(),
            error_backoff: config.error_backoff(),
            heartbeat_interval: config.heartbeat_interval(),
        }
    }
}

/// What one loop iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processed {
    /// The queue was empty.
    Idle,
    /// The entry was dropped: malformed, no store row, or not claimable.
    Discarded,
    /// A terminal outcome was committed for our claim.
    Completed { job_id: Uuid, status: JobStatus },
    /// The claim was lost before the outcome could be written.
    Abandoned { job_id: Uuid },
}

pub struct Worker {
    name: String,
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
    transcoder: Arc<dyn Transcoder>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        transcoder: Arc<dyn Transcoder>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            queue,
            transcoder,
            settings,
        }
    }

    /// Process jobs until `shutdown` flips to `true` (or its sender is
    /// dropped). A job already being processed is finished first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(worker = %self.name, "Worker started");

        while !*shutdown.borrow() {
            let pause = match self.process_next().await {
                Ok(Processed::Idle) => Some(self.settings.poll_interval),
                Ok(processed) => {
                    tracing::debug!(worker = %self.name, ?processed, "Iteration finished");
                    None
                }
                Err(e) => {
                    tracing::error!(worker = %self.name, error = %e, "Worker iteration failed, backing off");
                    Some(self.settings.error_backoff)
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = sleep(pause) => {}
                }
            }
        }

        tracing::info!(worker = %self.name, "Worker stopped");
    }

    /// Run one iteration of the claim/execute/report protocol.
    pub async fn process_next(&self) -> Result<Processed, WorkerError> {
        let job_id = match self.queue.dequeue().await {
            Ok(Some(id)) => id,
            Ok(None) => return Ok(Processed::Idle),
            Err(QueueError::MalformedEntry(raw)) => {
                tracing::warn!(worker = %self.name, entry = %raw, "Discarding malformed queue entry");
                return Ok(Processed::Discarded);
            }
            Err(e) => return Err(e.into()),
        };

        let Some(job) = self.store.get(job_id).await? else {
            tracing::warn!(worker = %self.name, job_id = %job_id, "Queued job has no store row, discarding");
            return Ok(Processed::Discarded);
        };

        let token = match self.store.claim(job_id).await? {
            ClaimOutcome::Claimed(token) => token,
            ClaimOutcome::NotClaimable(status) => {
                tracing::info!(
                    worker = %self.name,
                    job_id = %job_id,
                    status = %status,
                    "Job is not pending, discarding queue entry"
                );
                return Ok(Processed::Discarded);
            }
            ClaimOutcome::NotFound => {
                tracing::warn!(worker = %self.name, job_id = %job_id, "Job vanished before claim");
                return Ok(Processed::Discarded);
            }
        };

        tracing::info!(
            worker = %self.name,
            job_id = %job_id,
            original_name = %job.original_name,
            retry_count = job.retry_count,
            generation = token.generation,
            "Processing compression job"
        );

        let started = Instant::now();
        let output_path = self.output_path(&job, token);
        let Some(outcome) = self.execute(&job, &output_path, token).await else {
            tracing::warn!(worker = %self.name, job_id = %job_id, "Claim lost during transcode, abandoning");
            discard_output(&output_path).await;
            return Ok(Processed::Abandoned { job_id });
        };

        match self.store.complete(token, &outcome).await? {
            CompletionOutcome::Committed => {
                metrics::histogram!("compression_processing_seconds")
                    .record(started.elapsed().as_secs_f64());
                match outcome.status {
                    JobStatus::Finished => {
                        metrics::counter!("compression_jobs_completed").increment(1);
                        tracing::info!(worker = %self.name, job_id = %job_id, "Job finished");
                    }
                    _ => {
                        discard_output(&output_path).await;
                        metrics::counter!("compression_jobs_failed").increment(1);
                        tracing::warn!(
                            worker = %self.name,
                            job_id = %job_id,
                            message = %outcome.message,
                            "Job failed"
                        );
                    }
                }

                let input = self.settings.upload_dir.join(job.upload_file_name());
                if let Err(e) = remove_if_exists(&input).await {
                    tracing::error!(
                        job_id = %job_id,
                        path = %input.display(),
                        error = %e,
                        "Failed to remove input file"
                    );
                }

                Ok(Processed::Completed {
                    job_id,
                    status: outcome.status,
                })
            }
            CompletionOutcome::Fenced => {
                tracing::warn!(
                    worker = %self.name,
                    job_id = %job_id,
                    "Job was reclaimed before completion, dropping result"
                );
                discard_output(&output_path).await;
                Ok(Processed::Abandoned { job_id })
            }
        }
    }

    /// Every claim writes its own file, so a stale claimant can never touch
    /// the output a committed record points to.
    fn output_path(&self, job: &CompressionJob, token: ClaimToken) -> PathBuf {
        let ext = job.extension();
        let kind = MediaKind::from_extension(&ext);
        self.settings.output_dir.join(format!(
            "compressed_{}_{}{}",
            job.id,
            token.generation,
            kind.output_extension(&ext)
        ))
    }

    /// Build the transcode request and run it. `None` means the claim was lost.
    async fn execute(
        &self,
        job: &CompressionJob,
        output_path: &Path,
        token: ClaimToken,
    ) -> Option<JobOutcome> {
        let ext = job.extension();
        let kind = MediaKind::from_extension(&ext);

        let options = match MediaOptions::parse(kind, &job.params) {
            Ok(options) => options,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Unusable compression params");
                return Some(JobOutcome::failed(e.to_string()));
            }
        };

        let request = TranscodeRequest {
            input_path: self.settings.upload_dir.join(job.upload_file_name()),
            output_path: output_path.to_path_buf(),
            options,
        };

        let result = self.transcode_with_heartbeat(&request, token).await?;
        Some(match result {
            Ok(TranscodeReport { success: true, message }) => JobOutcome::finished(
                request.output_path.display().to_string(),
                kind.media_type(&ext),
                message,
            ),
            Ok(TranscodeReport { message, .. }) => JobOutcome::failed(message),
            Err(e) => JobOutcome::failed(e.to_string()),
        })
    }

    /// Drive the transcoder while refreshing the claim's heartbeat. Returns
    /// `None` (dropping, and so cancelling, the transcode) once the store
    /// reports the claim is no longer ours.
    async fn transcode_with_heartbeat(
        &self,
        request: &TranscodeRequest,
        token: ClaimToken,
    ) -> Option<Result<TranscodeReport, TranscodeError>> {
        let transcode = self.transcoder.transcode(request);
        tokio::pin!(transcode);

        let mut ticker = tokio::time::interval(self.settings.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; the claim itself just refreshed it.
        ticker.tick().await;

        loop {
            tokio::select! {
                result = &mut transcode => return Some(result),
                _ = ticker.tick() => match self.store.heartbeat(token).await {
                    Ok(true) => tracing::trace!(job_id = %token.job_id, "Heartbeat refreshed"),
                    Ok(false) => return None,
                    Err(e) => {
                        tracing::warn!(job_id = %token.job_id, error = %e, "Heartbeat refresh failed");
                    }
                },
            }
        }
    }
}

/// Register descriptions for the metrics a worker records.
pub fn describe_metrics() {
    metrics::describe_histogram!(
        "compression_processing_seconds",
        "Time from claim to committed outcome for one job"
    );
    metrics::describe_counter!("compression_jobs_completed", "Jobs committed as finished");
    metrics::describe_counter!(
        "compression_jobs_failed",
        "Jobs committed as failed by a worker"
    );
}

/// Delete a file that may already be gone.
pub async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Remove output that will never be recorded.
async fn discard_output(path: &Path) {
    if let Err(e) = remove_if_exists(path).await {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove discarded output");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Work queue error: {0}")]
    Queue(#[from] QueueError),
}
