use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{
    ClaimOutcome, ClaimToken, CompletionOutcome, CompressionJob, JobOutcome, JobStatus,
    ReclaimOutcome,
};

pub mod memory;
pub mod queries;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Durable record of every compression job.
///
/// All timestamps are written by the store itself, against the store's own
/// clock, and heartbeats never move backwards. Staleness is therefore passed
/// in as an age rather than a caller-side instant. Terminal rows (`finished`, `failed`) are never modified again.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a `pending` job with `retry_count = 0` and a fresh heartbeat.
    async fn create(
        &self,
        original_name: &str,
        algorithm: &str,
        params: serde_json::Value,
    ) -> Result<Uuid, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<CompressionJob>, StoreError>;

    /// Up to `limit` jobs, newest first.
    async fn list_recent(&self, limit: i64) -> Result<Vec<CompressionJob>, StoreError>;

    /// Write `status` and refresh the heartbeat. Writing `in_progress` counts
    /// as a new claim and invalidates outstanding claim tokens. Returns
    /// `false` when the row is missing or already terminal.
    async fn set_status(&self, id: Uuid, status: JobStatus) -> Result<bool, StoreError>;

    /// Move a `pending` job to `in_progress` under a new claim generation.
    async fn claim(&self, id: Uuid) -> Result<ClaimOutcome, StoreError>;

    /// Refresh the heartbeat of a held claim. `false` means the claim is gone.
    async fn heartbeat(&self, token: ClaimToken) -> Result<bool, StoreError>;

    /// Record a terminal outcome, only if `token` is still the live claim.
    async fn complete(
        &self,
        token: ClaimToken,
        outcome: &JobOutcome,
    ) -> Result<CompletionOutcome, StoreError>;

    /// Every `in_progress` job whose heartbeat is older than `older_than`.
    async fn list_overdue(&self, older_than: Duration) -> Result<Vec<(Uuid, i32)>, StoreError>;

    /// Atomically return an overdue job to `pending` (incrementing
    /// `retry_count`) or fail it once `max_retries` reclaims have been spent.
    /// A job that is no longer overdue `in_progress` is left alone.
    async fn reclaim_or_fail(
        &self,
        id: Uuid,
        max_retries: i32,
        older_than: Duration,
    ) -> Result<ReclaimOutcome, StoreError>;

    /// Touch and return every `pending` job whose heartbeat is older than
    /// `older_than`, so the caller can put it back on the queue.
    async fn requeue_stranded(&self, older_than: Duration) -> Result<Vec<Uuid>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt job row {id}: {reason}")]
    CorruptRow { id: Uuid, reason: String },

    #[error("Outcome status {0} is not terminal")]
    NonTerminalOutcome(JobStatus),
}
