use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::db::{JobStore, StoreError};
use crate::models::job::{
    ClaimOutcome, ClaimToken, CompletionOutcome, CompressionJob, JobOutcome, JobStatus,
    ReclaimOutcome,
};

const JOB_COLUMNS: &str = "id, original_name, status, algorithm, params, retry_count, \
     claim_generation, heartbeat, created_at, output_path, media_type, message";

/// PostgreSQL-backed job store over the `compression_jobs` table.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_status(id: Uuid, raw: &str) -> Result<JobStatus, StoreError> {
    JobStatus::from_str(raw).map_err(|_| StoreError::CorruptRow {
        id,
        reason: format!("unknown status {raw:?}"),
    })
}

fn job_from_row(row: &PgRow) -> Result<CompressionJob, StoreError> {
    let id: Uuid = row.try_get("id")?;
    let status: String = row.try_get("status")?;

    Ok(CompressionJob {
        id,
        original_name: row.try_get("original_name")?,
        status: parse_status(id, &status)?,
        algorithm: row.try_get("algorithm")?,
        params: row.try_get("params")?,
        retry_count: row.try_get("retry_count")?,
        claim_generation: row.try_get("claim_generation")?,
        heartbeat: row.try_get("heartbeat")?,
        created_at: row.try_get("created_at")?,
        output_path: row.try_get("output_path")?,
        media_type: row.try_get("media_type")?,
        message: row.try_get("message")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(
        &self,
        original_name: &str,
        algorithm: &str,
        params: serde_json::Value,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO compression_jobs (id, original_name, status, algorithm, params, heartbeat)
            VALUES ($1, $2, 'pending', $3, $4, NOW())
            "#,
        )
        .bind(id)
        .bind(original_name)
        .bind(algorithm)
        .bind(params)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<CompressionJob>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM compression_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<CompressionJob>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM compression_jobs ORDER BY created_at DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn set_status(&self, id: Uuid, status: JobStatus) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE compression_jobs
            SET status = $1,
                heartbeat = GREATEST(heartbeat, NOW()),
                claim_generation = CASE WHEN $1 = 'in_progress'
                                        THEN claim_generation + 1
                                        ELSE claim_generation END
            WHERE id = $2
              AND status NOT IN ('finished', 'failed')
            "#,
        )
        .bind(status.as_ref())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn claim(&self, id: Uuid) -> Result<ClaimOutcome, StoreError> {
        let claimed = sqlx::query(
            r#"
            UPDATE compression_jobs
            SET status = 'in_progress',
                heartbeat = GREATEST(heartbeat, NOW()),
                claim_generation = claim_generation + 1
            WHERE id = $1
              AND status = 'pending'
            RETURNING claim_generation
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = claimed {
            return Ok(ClaimOutcome::Claimed(ClaimToken {
                job_id: id,
                generation: row.try_get("claim_generation")?,
            }));
        }

        let current = sqlx::query("SELECT status FROM compression_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match current {
            Some(row) => {
                let status: String = row.try_get("status")?;
                Ok(ClaimOutcome::NotClaimable(parse_status(id, &status)?))
            }
            None => Ok(ClaimOutcome::NotFound),
        }
    }

    async fn heartbeat(&self, token: ClaimToken) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE compression_jobs
            SET heartbeat = GREATEST(heartbeat, NOW())
            WHERE id = $1
              AND claim_generation = $2
              AND status = 'in_progress'
            "#,
        )
        .bind(token.job_id)
        .bind(token.generation)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete(
        &self,
        token: ClaimToken,
        outcome: &JobOutcome,
    ) -> Result<CompletionOutcome, StoreError> {
        if !outcome.status.is_terminal() {
            return Err(StoreError::NonTerminalOutcome(outcome.status));
        }

        // A concurrent reclaim holds the row lock; once it commits this
        // statement re-evaluates the WHERE clause and matches nothing.
        let result = sqlx::query(
            r#"
            UPDATE compression_jobs
            SET status = $3,
                output_path = $4,
                media_type = $5,
                message = $6,
                heartbeat = GREATEST(heartbeat, NOW())
            WHERE id = $1
              AND claim_generation = $2
              AND status = 'in_progress'
            "#,
        )
        .bind(token.job_id)
        .bind(token.generation)
        .bind(outcome.status.as_ref())
        .bind(outcome.output_path.as_deref())
        .bind(outcome.media_type.as_deref())
        .bind(&outcome.message)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 1 {
            CompletionOutcome::Committed
        } else {
            CompletionOutcome::Fenced
        })
    }

    async fn list_overdue(&self, older_than: Duration) -> Result<Vec<(Uuid, i32)>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, retry_count
            FROM compression_jobs
            WHERE status = 'in_progress'
              AND heartbeat < NOW() - make_interval(secs => $1)
            ORDER BY heartbeat ASC
            "#,
        )
        .bind(older_than.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| -> Result<(Uuid, i32), StoreError> {
                Ok((r.try_get("id")?, r.try_get("retry_count")?))
            })
            .collect()
    }

    async fn reclaim_or_fail(
        &self,
        id: Uuid,
        max_retries: i32,
        older_than: Duration,
    ) -> Result<ReclaimOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT status, retry_count,
                   heartbeat < NOW() - make_interval(secs => $2) AS overdue
            FROM compression_jobs
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .bind(older_than.as_secs_f64())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(ReclaimOutcome::Skipped);
        };

        let status: String = row.try_get("status")?;
        let retry_count: i32 = row.try_get("retry_count")?;
        let overdue: bool = row.try_get("overdue")?;

        if parse_status(id, &status)? != JobStatus::InProgress || !overdue {
            tx.rollback().await?;
            return Ok(ReclaimOutcome::Skipped);
        }

        let outcome = if retry_count < max_retries {
            let row = sqlx::query(
                r#"
                UPDATE compression_jobs
                SET status = 'pending',
                    retry_count = retry_count + 1,
                    heartbeat = GREATEST(heartbeat, NOW())
                WHERE id = $1
                RETURNING retry_count
                "#,
            )
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

            ReclaimOutcome::Requeued {
                retry_count: row.try_get("retry_count")?,
            }
        } else {
            sqlx::query(
                r#"
                UPDATE compression_jobs
                SET status = 'failed',
                    message = $2,
                    heartbeat = GREATEST(heartbeat, NOW())
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(retry_exhausted_message(retry_count))
            .execute(&mut *tx)
            .await?;

            ReclaimOutcome::PermanentlyFailed
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn requeue_stranded(&self, older_than: Duration) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE compression_jobs
            SET heartbeat = GREATEST(heartbeat, NOW())
            WHERE status = 'pending'
              AND heartbeat < NOW() - make_interval(secs => $1)
            RETURNING id
            "#,
        )
        .bind(older_than.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| r.try_get("id").map_err(StoreError::from))
            .collect()
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Diagnostic stored on jobs the watchdog gives up on.
pub fn retry_exhausted_message(retry_count: i32) -> String {
    format!("Worker stopped responding; gave up after {retry_count} retries")
}
