//! Job model - durable PostgreSQL queue
//!
//! Workers claim with `FOR UPDATE SKIP LOCKED`; load jobs drain before
//! predict cycles so the loader's batches are written first. A failed job
//! that still has attempts left is parked until `run_after`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, FromRow, PgPool};

use appcompat_core::constants::LOAD_QUEUE;
use appcompat_core::logic::dispatch::{Job, JobHandle, JobPayload, JobQueue, JobStatus};
use appcompat_core::logic::error::{PipelineError, Result as PipelineResult};

#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: String,
    pub queue: String,
    pub collection: String,
    pub kind: String,
    pub payload: Json<JobPayload>,
    pub status: String,
    pub attempts: i32,
    pub timeout_secs: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub run_after: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRow {
    pub fn into_job(self) -> Job {
        Job {
            id: self.id.trim_end().to_string(),
            queue: self.queue,
            collection: self.collection,
            payload: self.payload.0,
            timeout_secs: self.timeout_secs.max(1) as u64,
        }
    }
}

/// Upper bound for the delay before a retry
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(600);

const CLAIM_SQL: &str = r#"
UPDATE jobs
SET status = 'started', attempts = attempts + 1, started_at = NOW()
WHERE id = (
    SELECT id FROM jobs
    WHERE status = 'queued' AND run_after <= NOW()
    ORDER BY CASE WHEN queue = $1 THEN 0 ELSE 1 END, run_after, created_at
    LIMIT 1
    FOR UPDATE SKIP LOCKED
)
RETURNING *
"#;

const FAIL_SQL: &str = r#"
UPDATE jobs
SET status = CASE WHEN attempts >= $3 THEN 'failed' ELSE 'queued' END,
    last_error = $2,
    run_after = NOW() + make_interval(secs => $4),
    finished_at = CASE WHEN attempts >= $3 THEN NOW() ELSE NULL END
WHERE id = $1
RETURNING status
"#;

/// `base` doubled per attempt already made, capped at [`MAX_RETRY_BACKOFF`]
pub fn retry_backoff(base: Duration, attempts: i32) -> Duration {
    let exp = attempts.saturating_sub(1).clamp(0, 16) as u32;
    base.saturating_mul(1 << exp).min(MAX_RETRY_BACKOFF)
}

#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Take the oldest due job, load queue first
    pub async fn claim(&self) -> Result<Option<(Job, i32)>, sqlx::Error> {
        let row = sqlx::query_as::<_, JobRow>(CLAIM_SQL)
            .bind(LOAD_QUEUE)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| {
            let attempts = r.attempts;
            (r.into_job(), attempts)
        }))
    }

    pub async fn finish(&self, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE jobs SET status = 'finished', finished_at = NOW(), last_error = NULL WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Requeue after `backoff` until `max_attempts`, then mark failed
    pub async fn fail(
        &self,
        id: &str,
        error: &str,
        max_attempts: i32,
        backoff: Duration,
    ) -> Result<JobStatus, sqlx::Error> {
        let status: String = sqlx::query_scalar(FAIL_SQL)
            .bind(id)
            .bind(error)
            .bind(max_attempts)
            .bind(backoff.as_secs_f64())
            .fetch_one(&self.pool)
            .await?;

        Ok(JobStatus::parse(&status).unwrap_or(JobStatus::Failed))
    }

    /// Requeue jobs whose worker vanished past the job's own timeout
    pub async fn requeue_stale(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = 'queued', run_after = NOW()
            WHERE status = 'started'
              AND started_at < NOW() - make_interval(secs => timeout_secs)
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    /// Existing ids are left alone unless they failed, which re-arms them
    async fn enqueue(&self, job: &Job) -> PipelineResult<JobHandle> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, queue, collection, kind, payload, timeout_secs)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET status = 'queued', attempts = 0, last_error = NULL, finished_at = NULL, run_after = NOW()
            WHERE jobs.status = 'failed'
            "#,
        )
        .bind(&job.id)
        .bind(&job.queue)
        .bind(&job.collection)
        .bind(job.payload.kind())
        .bind(Json(&job.payload))
        .bind(job.timeout_secs as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::JobSubmission(e.to_string()))?;

        Ok(JobHandle {
            id: job.id.clone(),
            queue: job.queue.clone(),
        })
    }

    async fn status(&self, id: &str) -> PipelineResult<Option<JobStatus>> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PipelineError::Store(e.to_string()))?;
        Ok(status.as_deref().and_then(JobStatus::parse))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_skips_parked_jobs() {
        assert!(CLAIM_SQL.contains("status = 'queued' AND run_after <= NOW()"));
        assert!(CLAIM_SQL.contains("FOR UPDATE SKIP LOCKED"));
    }

    #[test]
    fn test_fail_pushes_run_after_forward() {
        assert!(FAIL_SQL.contains("run_after = NOW() + make_interval(secs => $4)"));
        assert!(FAIL_SQL.contains("WHEN attempts >= $3 THEN 'failed'"));
    }

    #[test]
    fn test_retry_backoff_doubles_and_caps() {
        let base = Duration::from_secs(30);
        assert_eq!(retry_backoff(base, 1), Duration::from_secs(30));
        assert_eq!(retry_backoff(base, 2), Duration::from_secs(60));
        assert_eq!(retry_backoff(base, 3), Duration::from_secs(120));
        assert_eq!(retry_backoff(base, 0), Duration::from_secs(30));
        assert_eq!(retry_backoff(base, 40), MAX_RETRY_BACKOFF);
        assert_eq!(retry_backoff(Duration::ZERO, 5), Duration::ZERO);
    }
}
