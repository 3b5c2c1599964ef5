//! In-process job store with the same transition rules as [`PgJobStore`].
//!
//! Every operation runs under one mutex, which gives the same atomicity the
//! row lock gives in PostgreSQL. Like the database, the store keeps its own
//! clock; tests move it forward with [`MemoryJobStore::advance`] instead of
//! sleeping through heartbeat thresholds.
//!
//! [`PgJobStore`]: crate::db::queries::PgJobStore

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use crate::db::queries::retry_exhausted_message;
use crate::db::{JobStore, StoreError};
use crate::models::job::{
    ClaimOutcome, ClaimToken, CompletionOutcome, CompressionJob, JobOutcome, JobStatus,
    ReclaimOutcome,
};

#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, CompressionJob>,
    skew: TimeDelta,
}

impl Inner {
    fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.skew
    }

    fn cutoff(&self, older_than: Duration) -> DateTime<Utc> {
        let now = self.now();
        TimeDelta::from_std(older_than)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the store's clock forward.
    pub fn advance(&self, by: Duration) {
        let mut inner = self.lock();
        let by = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
        inner.skew = inner.skew.checked_add(&by).unwrap_or(TimeDelta::MAX);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn touch(job: &mut CompressionJob, now: DateTime<Utc>) {
    job.heartbeat = job.heartbeat.max(now);
}

fn holds_claim(job: &CompressionJob, token: ClaimToken) -> bool {
    job.status == JobStatus::InProgress && job.claim_generation == token.generation
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(
        &self,
        original_name: &str,
        algorithm: &str,
        params: serde_json::Value,
    ) -> Result<Uuid, StoreError> {
        let mut inner = self.lock();
        let now = inner.now();
        let job = CompressionJob {
            id: Uuid::new_v4(),
            original_name: original_name.to_string(),
            status: JobStatus::Pending,
            algorithm: algorithm.to_string(),
            params,
            retry_count: 0,
            claim_generation: 0,
            heartbeat: now,
            created_at: now,
            output_path: None,
            media_type: None,
            message: None,
        };
        let id = job.id;
        inner.jobs.insert(id, job);
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<CompressionJob>, StoreError> {
        Ok(self.lock().jobs.get(&id).cloned())
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<CompressionJob>, StoreError> {
        let inner = self.lock();
        let mut jobs: Vec<_> = inner.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(jobs)
    }

    async fn set_status(&self, id: Uuid, status: JobStatus) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let now = inner.now();
        let Some(job) = inner.jobs.get_mut(&id).filter(|job| !job.status.is_terminal()) else {
            return Ok(false);
        };

        if status == JobStatus::InProgress {
            job.claim_generation += 1;
        }
        job.status = status;
        touch(job, now);
        Ok(true)
    }

    async fn claim(&self, id: Uuid) -> Result<ClaimOutcome, StoreError> {
        let mut inner = self.lock();
        let now = inner.now();
        let Some(job) = inner.jobs.get_mut(&id) else {
            return Ok(ClaimOutcome::NotFound);
        };
        if job.status != JobStatus::Pending {
            return Ok(ClaimOutcome::NotClaimable(job.status));
        }

        job.status = JobStatus::InProgress;
        job.claim_generation += 1;
        touch(job, now);
        Ok(ClaimOutcome::Claimed(ClaimToken {
            job_id: id,
            generation: job.claim_generation,
        }))
    }

    async fn heartbeat(&self, token: ClaimToken) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let now = inner.now();
        match inner.jobs.get_mut(&token.job_id) {
            Some(job) if holds_claim(job, token) => {
                touch(job, now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete(
        &self,
        token: ClaimToken,
        outcome: &JobOutcome,
    ) -> Result<CompletionOutcome, StoreError> {
        if !outcome.status.is_terminal() {
            return Err(StoreError::NonTerminalOutcome(outcome.status));
        }

        let mut inner = self.lock();
        let now = inner.now();
        match inner.jobs.get_mut(&token.job_id) {
            Some(job) if holds_claim(job, token) => {
                job.status = outcome.status;
                job.output_path = outcome.output_path.clone();
                job.media_type = outcome.media_type.clone();
                job.message = Some(outcome.message.clone());
                touch(job, now);
                Ok(CompletionOutcome::Committed)
            }
            _ => Ok(CompletionOutcome::Fenced),
        }
    }

    async fn list_overdue(&self, older_than: Duration) -> Result<Vec<(Uuid, i32)>, StoreError> {
        let inner = self.lock();
        let cutoff = inner.cutoff(older_than);
        let mut overdue: Vec<_> = inner
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::InProgress && job.heartbeat < cutoff)
            .map(|job| (job.heartbeat, job.id, job.retry_count))
            .collect();
        overdue.sort();
        Ok(overdue.into_iter().map(|(_, id, retries)| (id, retries)).collect())
    }

    async fn reclaim_or_fail(
        &self,
        id: Uuid,
        max_retries: i32,
        older_than: Duration,
    ) -> Result<ReclaimOutcome, StoreError> {
        let mut inner = self.lock();
        let (now, cutoff) = (inner.now(), inner.cutoff(older_than));
        let Some(job) = inner.jobs.get_mut(&id) else {
            return Ok(ReclaimOutcome::Skipped);
        };
        if job.status != JobStatus::InProgress || job.heartbeat >= cutoff {
            return Ok(ReclaimOutcome::Skipped);
        }

        touch(job, now);
        if job.retry_count < max_retries {
            job.status = JobStatus::Pending;
            job.retry_count += 1;
            Ok(ReclaimOutcome::Requeued {
                retry_count: job.retry_count,
            })
        } else {
            job.status = JobStatus::Failed;
            job.message = Some(retry_exhausted_message(job.retry_count));
            Ok(ReclaimOutcome::PermanentlyFailed)
        }
    }

    async fn requeue_stranded(&self, older_than: Duration) -> Result<Vec<Uuid>, StoreError> {
        let mut inner = self.lock();
        let (now, cutoff) = (inner.now(), inner.cutoff(older_than));
        let mut stranded = Vec::new();
        for job in inner.jobs.values_mut() {
            if job.status == JobStatus::Pending && job.heartbeat < cutoff {
                touch(job, now);
                stranded.push(job.id);
            }
        }
        Ok(stranded)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn claimed(store: &MemoryJobStore) -> ClaimToken {
        let id = store.create("photo.png", "image", json!({})).await.unwrap();
        match store.claim(id).await.unwrap() {
            ClaimOutcome::Claimed(token) => token,
            other => panic!("expected claim, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_starts_pending() {
        let store = MemoryJobStore::new();
        let id = store.create("clip.mp4", "video", json!({})).await.unwrap();
        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.claim_generation, 0);
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_requires_pending() {
        let store = MemoryJobStore::new();
        let token = claimed(&store).await;
        assert_eq!(token.generation, 1);
        assert_eq!(
            store.claim(token.job_id).await.unwrap(),
            ClaimOutcome::NotClaimable(JobStatus::InProgress)
        );
        assert_eq!(store.claim(Uuid::new_v4()).await.unwrap(), ClaimOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_set_status_never_leaves_terminal() {
        let store = MemoryJobStore::new();
        let id = store.create("a.wav", "audio", json!({})).await.unwrap();
        assert!(store.set_status(id, JobStatus::Failed).await.unwrap());
        assert!(!store.set_status(id, JobStatus::Failed).await.unwrap());
        assert!(!store.set_status(id, JobStatus::Pending).await.unwrap());
        assert_eq!(store.get(id).await.unwrap().unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_set_status_in_progress_fences_old_token() {
        let store = MemoryJobStore::new();
        let token = claimed(&store).await;
        assert!(store.set_status(token.job_id, JobStatus::InProgress).await.unwrap());
        assert!(!store.heartbeat(token).await.unwrap());
    }

    #[tokio::test]
    async fn test_complete_rejects_non_terminal_outcome() {
        let store = MemoryJobStore::new();
        let token = claimed(&store).await;
        let outcome = JobOutcome {
            status: JobStatus::Pending,
            output_path: None,
            media_type: None,
            message: String::new(),
        };
        assert!(matches!(
            store.complete(token, &outcome).await,
            Err(StoreError::NonTerminalOutcome(JobStatus::Pending))
        ));
    }

    #[tokio::test]
    async fn test_reclaim_skips_fresh_heartbeat() {
        let store = MemoryJobStore::new();
        let token = claimed(&store).await;
        let threshold = Duration::from_secs(10);
        assert_eq!(
            store.reclaim_or_fail(token.job_id, 3, threshold).await.unwrap(),
            ReclaimOutcome::Skipped
        );
        assert!(store.list_overdue(threshold).await.unwrap().is_empty());

        store.advance(Duration::from_secs(11));
        assert_eq!(store.list_overdue(threshold).await.unwrap(), vec![(token.job_id, 0)]);
        assert_eq!(
            store.reclaim_or_fail(token.job_id, 3, threshold).await.unwrap(),
            ReclaimOutcome::Requeued { retry_count: 1 }
        );
    }

    #[tokio::test]
    async fn test_list_recent_newest_first() {
        let store = MemoryJobStore::new();
        let first = store.create("a.png", "image", json!({})).await.unwrap();
        store.advance(Duration::from_secs(1));
        let second = store.create("b.png", "image", json!({})).await.unwrap();
        store.advance(Duration::from_secs(1));
        let third = store.create("c.png", "image", json!({})).await.unwrap();

        let ids: Vec<_> = store
            .list_recent(2)
            .await
            .unwrap()
            .into_iter()
            .map(|job| job.id)
            .collect();
        assert_eq!(ids, vec![third, second]);
        assert_eq!(store.list_recent(10).await.unwrap().last().map(|j| j.id), Some(first));
        assert!(store.list_recent(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stranded_pending_is_touched_once() {
        let store = MemoryJobStore::new();
        let id = store.create("doc.pdf", "archive", json!({})).await.unwrap();
        let grace = Duration::from_secs(60);
        assert!(store.requeue_stranded(grace).await.unwrap().is_empty());

        store.advance(Duration::from_secs(61));
        assert_eq!(store.requeue_stranded(grace).await.unwrap(), vec![id]);

        // Touched rows are not returned again until the grace period passes.
        assert!(store.requeue_stranded(grace).await.unwrap().is_empty());
    }
}
