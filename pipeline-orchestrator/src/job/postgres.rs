//! Postgres-backed `JobStore`.
//!
//! One row per job in `orchestrator_jobs`. Claim is `SELECT ... FOR UPDATE
//! SKIP LOCKED` inside a transaction followed by a guarded `UPDATE`, the
//! exact pattern used by `pipeline_queue::backend::postgres::PostgresBackend`
//! - generalized here for per-studio partitioning and an optional stale
//! reclaim of `running` rows. Idempotent submit leans on a unique index over
//! `(user_id, studio_type, request_hash)` with `ON CONFLICT DO NOTHING` plus
//! a fallback `SELECT` to read back the winner's row, same as that crate's
//! idempotency-key enqueue path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::job::{Job, JobStatus, JobStore, StudioType};

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    studio_type: String,
    status: String,
    user_id: Uuid,
    request_hash: String,
    payload: serde_json::Value,
    meta: serde_json::Value,
    error_code: Option<String>,
    error_message: Option<String>,
    attempt_count: i32,
    next_run_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRow {
    fn into_job(self) -> OrchestratorResult<Job> {
        Ok(Job {
            id: self.id,
            studio_type: self.studio_type.parse()?,
            status: self.status.parse()?,
            user_id: self.user_id,
            request_hash: self.request_hash,
            payload: self.payload,
            meta: self.meta,
            error_code: self.error_code,
            error_message: self.error_message,
            attempt_count: self.attempt_count as u32,
            next_run_at: self.next_run_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Durable, multi-worker-safe `JobStore` backed by a Postgres table.
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> OrchestratorResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> OrchestratorResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| OrchestratorError::Internal(e.to_string()))
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn submit(
        &self,
        user_id: Uuid,
        studio_type: StudioType,
        request_hash: String,
        payload: serde_json::Value,
        meta: serde_json::Value,
    ) -> OrchestratorResult<Job> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO orchestrator_jobs (
                id, studio_type, status, user_id, request_hash, payload, meta,
                attempt_count, next_run_at, created_at, updated_at
            ) VALUES ($1, $2, 'queued', $3, $4, $5, $6, 0, $7, $7, $7)
            ON CONFLICT (user_id, studio_type, request_hash) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(studio_type.as_str())
        .bind(user_id)
        .bind(&request_hash)
        .bind(&payload)
        .bind(&meta)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let final_id = match inserted {
            Some((id,)) => id,
            None => {
                sqlx::query_scalar(
                    r#"
                    SELECT id FROM orchestrator_jobs
                    WHERE user_id = $1 AND studio_type = $2 AND request_hash = $3
                    "#,
                )
                .bind(user_id)
                .bind(studio_type.as_str())
                .bind(&request_hash)
                .fetch_one(&self.pool)
                .await?
            }
        };

        self.get(final_id).await
    }

    async fn claim(
        &self,
        studio_type: StudioType,
        batch_size: usize,
        stale_after: Option<std::time::Duration>,
    ) -> OrchestratorResult<Vec<Job>> {
        let now = Utc::now();
        let stale_cutoff = stale_after.map(|d| now - chrono::Duration::from_std(d).unwrap_or_default());

        let mut tx = self.pool.begin().await?;

        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM orchestrator_jobs
            WHERE studio_type = $1
              AND (
                    (status = 'queued' AND (next_run_at IS NULL OR next_run_at <= $2))
                 OR (status = 'running' AND $3::timestamptz IS NOT NULL AND updated_at <= $3)
              )
            ORDER BY next_run_at NULLS FIRST, created_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT $4
            "#,
        )
        .bind(studio_type.as_str())
        .bind(now)
        .bind(stale_cutoff)
        .bind(batch_size as i64)
        .fetch_all(&mut *tx)
        .await?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            let new_attempt = row.attempt_count + 1;
            sqlx::query(
                r#"
                UPDATE orchestrator_jobs
                SET status = 'running', attempt_count = $1, updated_at = $2
                WHERE id = $3
                "#,
            )
            .bind(new_attempt)
            .bind(now)
            .bind(row.id)
            .execute(&mut *tx)
            .await?;

            let mut job = row.into_job()?;
            job.status = JobStatus::Running;
            job.attempt_count = new_attempt as u32;
            job.updated_at = now;
            claimed.push(job);
        }

        tx.commit().await?;
        Ok(claimed)
    }

    async fn get(&self, job_id: Uuid) -> OrchestratorResult<Job> {
        let row: JobRow = sqlx::query_as("SELECT * FROM orchestrator_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchestratorError::Internal(format!("job {job_id} not found")))?;
        row.into_job()
    }

    async fn mark_succeeded(&self, job_id: Uuid) -> OrchestratorResult<()> {
        sqlx::query(
            "UPDATE orchestrator_jobs SET status = 'succeeded', updated_at = $1 WHERE id = $2",
        )
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_stitching(&self, job_id: Uuid) -> OrchestratorResult<()> {
        sqlx::query(
            "UPDATE orchestrator_jobs SET status = 'stitching', updated_at = $1 WHERE id = $2",
        )
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        error_code: &str,
        error_message: &str,
    ) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            UPDATE orchestrator_jobs
            SET status = 'failed', error_code = $1, error_message = $2, updated_at = $3
            WHERE id = $4
            "#,
        )
        .bind(error_code)
        .bind(error_message)
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn requeue(
        &self,
        job_id: Uuid,
        delay: std::time::Duration,
        error_code: &str,
        error_message: &str,
    ) -> OrchestratorResult<()> {
        let now = Utc::now();
        let next_run_at = now + chrono::Duration::from_std(delay).unwrap_or_default();
        sqlx::query(
            r#"
            UPDATE orchestrator_jobs
            SET status = 'queued', next_run_at = $1, error_code = $2, error_message = $3, updated_at = $4
            WHERE id = $5
            "#,
        )
        .bind(next_run_at)
        .bind(error_code)
        .bind(error_message)
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cancel(&self, job_id: Uuid) -> OrchestratorResult<bool> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE orchestrator_jobs
            SET status = 'canceled', updated_at = $1
            WHERE id = $2 AND status NOT IN ('succeeded', 'failed', 'canceled')
            "#,
        )
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows_affected > 0)
    }

    async fn patch_meta(&self, job_id: Uuid, patch: serde_json::Value) -> OrchestratorResult<Job> {
        sqlx::query(
            r#"
            UPDATE orchestrator_jobs
            SET meta = COALESCE(meta, '{}'::jsonb) || $1, updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(&patch)
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        self.get(job_id).await
    }

    async fn due_count(&self, studio_type: StudioType, now: DateTime<Utc>) -> OrchestratorResult<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM orchestrator_jobs
            WHERE studio_type = $1 AND status = 'queued' AND (next_run_at IS NULL OR next_run_at <= $2)
            "#,
        )
        .bind(studio_type.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }
}
