//! In-process harness: memory store and queue, a temp upload/output tree and
//! scriptable transcoders standing in for ffmpeg.

#![allow(dead_code)]

use async_trait::async_trait;
use media_squeeze::{
    db::{memory::MemoryJobStore, JobStore},
    models::job::{upload_file_name, ClaimOutcome, ClaimToken, JobStatus},
    services::{
        queue::{MemoryQueue, WorkQueue},
        transcoder::{TranscodeError, TranscodeReport, TranscodeRequest, Transcoder},
        watchdog::{Watchdog, WatchdogSettings},
        worker::{Worker, WorkerSettings},
    },
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;
use uuid::Uuid;

pub const OUTPUT_BYTES: &[u8] = b"compressed bytes";
pub const GATED_BYTES: &[u8] = b"bytes from a gated transcode";

pub struct Harness {
    pub store: Arc<MemoryJobStore>,
    pub queue: Arc<MemoryQueue>,
    dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("uploads")).unwrap();
        std::fs::create_dir_all(dir.path().join("compressed")).unwrap();
        Self {
            store: Arc::new(MemoryJobStore::new()),
            queue: Arc::new(MemoryQueue::new()),
            dir,
        }
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.dir.path().join("uploads")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("compressed")
    }

    pub fn input_path(&self, id: Uuid, original_name: &str) -> PathBuf {
        self.upload_dir().join(upload_file_name(id, original_name))
    }

    /// Record, store and enqueue a job the way the gateway does.
    pub async fn submit(&self, original_name: &str, params: serde_json::Value) -> Uuid {
        let id = self
            .store
            .create(original_name, "test", params)
            .await
            .expect("create");
        std::fs::write(self.input_path(id, original_name), b"original bytes").unwrap();
        self.queue.enqueue(id).await.expect("enqueue");
        id
    }

    pub fn worker(&self, name: &str, transcoder: Arc<dyn Transcoder>) -> Worker {
        self.worker_with_heartbeat(name, transcoder, Duration::from_millis(20))
    }

    pub fn worker_with_heartbeat(
        &self,
        name: &str,
        transcoder: Arc<dyn Transcoder>,
        heartbeat_interval: Duration,
    ) -> Worker {
        Worker::new(
            name,
            self.store.clone(),
            self.queue.clone(),
            transcoder,
            WorkerSettings {
                upload_dir: self.upload_dir(),
                output_dir: self.output_dir(),
                poll_interval: Duration::from_millis(5),
                error_backoff: Duration::from_millis(5),
                heartbeat_interval,
            },
        )
    }

    /// Move the store clock past the default overdue threshold.
    pub fn pass_overdue_threshold(&self) {
        self.store.advance(Duration::from_secs(11));
    }

    /// Output files currently in the output directory.
    pub fn outputs(&self) -> Vec<PathBuf> {
        let mut files: Vec<_> = std::fs::read_dir(self.output_dir())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        files.sort();
        files
    }

    pub fn watchdog(&self, max_retries: i32) -> Watchdog {
        self.watchdog_with(max_retries, Duration::from_secs(10))
    }

    pub fn watchdog_with(&self, max_retries: i32, overdue_threshold: Duration) -> Watchdog {
        Watchdog::new(
            self.store.clone(),
            self.queue.clone(),
            WatchdogSettings {
                interval: Duration::from_millis(10),
                overdue_threshold,
                max_retries,
                stranded_grace: Duration::from_secs(60),
            },
        )
    }

    /// A worker that pops the job, claims it and then dies silently.
    pub async fn crash_after_claim(&self) -> ClaimToken {
        let id = self
            .queue
            .dequeue()
            .await
            .unwrap()
            .expect("queue should hold a job");
        match self.store.claim(id).await.unwrap() {
            ClaimOutcome::Claimed(token) => token,
            other => panic!("expected a claim, got {other:?}"),
        }
    }

    pub async fn status(&self, id: Uuid) -> JobStatus {
        self.store.get(id).await.unwrap().expect("job row").status
    }

    pub async fn wait_for_status(&self, id: Uuid, status: JobStatus) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.status(id).await != status {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("job {id} never reached {status}"));
    }
}

/// Succeeds or fails immediately. Success writes a small output file.
pub struct Instant(pub bool);

#[async_trait]
impl Transcoder for Instant {
    async fn transcode(&self, request: &TranscodeRequest) -> Result<TranscodeReport, TranscodeError> {
        if !self.0 {
            return Ok(TranscodeReport {
                success: false,
                message: "Invalid data found when processing input".to_string(),
            });
        }
        tokio::fs::write(&request.output_path, OUTPUT_BYTES).await?;
        Ok(TranscodeReport {
            success: true,
            message: "Compression completed successfully".to_string(),
        })
    }
}

/// Never returns. Dropping the future is the only way out.
pub struct Hang;

#[async_trait]
impl Transcoder for Hang {
    async fn transcode(&self, _request: &TranscodeRequest) -> Result<TranscodeReport, TranscodeError> {
        std::future::pending().await
    }
}

/// Blocks until the gate is opened, then writes [`GATED_BYTES`] and succeeds.
pub struct Gated(pub Arc<Notify>);

#[async_trait]
impl Transcoder for Gated {
    async fn transcode(&self, request: &TranscodeRequest) -> Result<TranscodeReport, TranscodeError> {
        self.0.notified().await;
        tokio::fs::write(&request.output_path, GATED_BYTES).await?;
        Ok(TranscodeReport {
            success: true,
            message: "Compression completed successfully".to_string(),
        })
    }
}
