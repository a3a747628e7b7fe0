//! Postgres-backed `QueueBackend`.
//!
//! One row per job in `pipeline_jobs`. Claim is `SELECT ... FOR UPDATE SKIP
//! LOCKED` inside a transaction followed by a guarded `UPDATE`, so two
//! workers racing on the same queue never both walk away with a lease.
//! Idempotent enqueue leans on a partial unique index (see
//! `migrations/0001_init.sql`) scoped to non-terminal jobs, so a finished
//! job never blocks a legitimate resubmission under the same key.
//!
//! Event delivery is an in-process broadcast, same as `MemoryBackend` - a
//! worker loop and its observability subscribers share one process. Fanning
//! events out across processes would mean attaching a
//! `sqlx::postgres::PgListener` to a `NOTIFY` on job state changes; nothing
//! in this crate's contract requires it today.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::sync::broadcast;

use crate::{
    backend::{BoxStream, QueueBackend},
    types::LeaseToken,
    JobEvent, JobId, JobMessage, JobPriority, JobRecord, JobStatus, LeasedJob, QueueCapabilities,
    QueueCtx, QueueError, QueueResult,
};

#[derive(Debug, Clone, sqlx::FromRow)]
struct PgJobRow {
    job_id: String,
    tenant_id: String,
    queue_name: String,
    job_type: String,
    payload_bytes: Vec<u8>,
    codec: String,
    priority: i16,
    max_retries: i32,
    run_at: DateTime<Utc>,
    idempotency_key: Option<String>,

    status: String,
    attempt: i32,
    last_error: Option<String>,

    lease_token: Option<String>,
    lease_until: Option<DateTime<Utc>>,
    retry_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    canceled_at: Option<DateTime<Utc>>,

    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PgJobRow {
    fn status(&self) -> QueueResult<JobStatus> {
        match self.status.as_str() {
            "enqueued" => Ok(JobStatus::Enqueued),
            "scheduled" => Ok(JobStatus::Scheduled),
            "processing" => {
                let lease_until = self.lease_until.ok_or_else(|| {
                    QueueError::Internal(format!("job {} is processing with no lease_until", self.job_id))
                })?;
                Ok(JobStatus::Processing { lease_until })
            }
            "retrying" => {
                let retry_at = self.retry_at.ok_or_else(|| {
                    QueueError::Internal(format!("job {} is retrying with no retry_at", self.job_id))
                })?;
                Ok(JobStatus::Retrying { retry_at })
            }
            "completed" => {
                let completed_at = self.completed_at.ok_or_else(|| {
                    QueueError::Internal(format!("job {} is completed with no completed_at", self.job_id))
                })?;
                Ok(JobStatus::Completed { completed_at })
            }
            "failed" => {
                let failed_at = self.failed_at.ok_or_else(|| {
                    QueueError::Internal(format!("job {} is failed with no failed_at", self.job_id))
                })?;
                Ok(JobStatus::Failed {
                    failed_at,
                    error: self.last_error.clone().unwrap_or_default(),
                })
            }
            "canceled" => {
                let canceled_at = self.canceled_at.ok_or_else(|| {
                    QueueError::Internal(format!("job {} is canceled with no canceled_at", self.job_id))
                })?;
                Ok(JobStatus::Canceled { canceled_at })
            }
            other => Err(QueueError::Internal(format!("unknown job status {other:?}"))),
        }
    }

    fn into_record(self) -> QueueResult<JobRecord> {
        let priority = JobPriority::from_u8(self.priority as u8)
            .ok_or_else(|| QueueError::Internal(format!("invalid priority {}", self.priority)))?;
        let status = self.status()?;

        let message = JobMessage {
            job_type: self.job_type.clone(),
            payload_bytes: self.payload_bytes.clone(),
            codec: self.codec.clone(),
            queue: self.queue_name.clone(),
            priority,
            max_retries: self.max_retries as u32,
            run_at: self.run_at,
            idempotency_key: self.idempotency_key.clone(),
        };

        Ok(JobRecord {
            job_id: JobId::from_string(self.job_id.clone()),
            tenant_id: self.tenant_id.clone(),
            message,
            status,
            attempt: self.attempt as u32,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_error: self.last_error.clone(),
            lease_token: self.lease_token.clone().map(LeaseToken::from_string),
            lease_until: self.lease_until,
        })
    }
}

/// Durable, multi-worker-safe `QueueBackend` backed by a Postgres table.
pub struct PostgresBackend {
    pool: PgPool,
    lease_duration: chrono::Duration,
    event_broadcaster: broadcast::Sender<JobEvent>,
}

impl PostgresBackend {
    /// Wrap an existing pool. Callers own pool sizing/TLS/connect options.
    pub fn new(pool: PgPool) -> Self {
        let (event_broadcaster, _) = broadcast::channel(1000);
        Self {
            pool,
            lease_duration: chrono::Duration::seconds(300),
            event_broadcaster,
        }
    }

    /// Open a pool against `database_url` with sensible defaults for a
    /// worker process (a handful of connections, not a web server's pool).
    pub async fn connect(database_url: &str) -> QueueResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Override the default 5 minute lease window.
    pub fn with_lease_duration(mut self, duration: chrono::Duration) -> Self {
        self.lease_duration = duration;
        self
    }

    /// Apply this crate's migrations. Idempotent; safe to call on every boot.
    pub async fn migrate(&self) -> QueueResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| QueueError::Internal(e.to_string()))
    }

    fn emit(&self, event: JobEvent) {
        let _ = self.event_broadcaster.send(event);
    }

    async fn fetch_for_update(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        job_id: &JobId,
        tenant_id: &str,
    ) -> QueueResult<PgJobRow> {
        let row: Option<PgJobRow> = sqlx::query_as(
            r#"SELECT * FROM pipeline_jobs WHERE job_id = $1 AND tenant_id = $2 FOR UPDATE"#,
        )
        .bind(job_id.as_str())
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?;

        row.ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))
    }
}

#[async_trait]
impl QueueBackend for PostgresBackend {
    async fn enqueue(&self, ctx: QueueCtx, message: JobMessage) -> QueueResult<JobId> {
        let job_id = JobId::new();
        let now = Utc::now();
        let status = if message.run_at > now { "scheduled" } else { "enqueued" };

        if let Some(ref key) = message.idempotency_key {
            let inserted: Option<(String,)> = sqlx::query_as(
                r#"
                INSERT INTO pipeline_jobs (
                    job_id, tenant_id, queue_name, job_type, payload_bytes, codec,
                    priority, max_retries, run_at, idempotency_key,
                    status, attempt, created_at, updated_at
                ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,0,$12,$12)
                ON CONFLICT (tenant_id, queue_name, job_type, idempotency_key)
                    WHERE idempotency_key IS NOT NULL AND status NOT IN ('completed', 'failed', 'canceled')
                DO NOTHING
                RETURNING job_id
                "#,
            )
            .bind(job_id.as_str())
            .bind(&ctx.tenant_id)
            .bind(&message.queue)
            .bind(&message.job_type)
            .bind(&message.payload_bytes)
            .bind(&message.codec)
            .bind(message.priority.as_u8() as i16)
            .bind(message.max_retries as i32)
            .bind(message.run_at)
            .bind(key)
            .bind(status)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

            let final_id = match inserted {
                Some((id,)) => id,
                None => {
                    sqlx::query_scalar(
                        r#"
                        SELECT job_id FROM pipeline_jobs
                        WHERE tenant_id = $1 AND queue_name = $2 AND job_type = $3
                          AND idempotency_key = $4
                          AND status NOT IN ('completed', 'failed', 'canceled')
                        "#,
                    )
                    .bind(&ctx.tenant_id)
                    .bind(&message.queue)
                    .bind(&message.job_type)
                    .bind(key)
                    .fetch_one(&self.pool)
                    .await?
                }
            };

            if final_id == job_id.as_str() {
                self.emit(JobEvent::Enqueued {
                    job_id: job_id.clone(),
                    tenant_id: ctx.tenant_id.clone(),
                    queue: message.queue.clone(),
                    job_type: message.job_type.clone(),
                    at: now,
                });
            }

            return Ok(JobId::from_string(final_id));
        }

        sqlx::query(
            r#"
            INSERT INTO pipeline_jobs (
                job_id, tenant_id, queue_name, job_type, payload_bytes, codec,
                priority, max_retries, run_at, idempotency_key,
                status, attempt, created_at, updated_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,NULL,$10,0,$11,$11)
            "#,
        )
        .bind(job_id.as_str())
        .bind(&ctx.tenant_id)
        .bind(&message.queue)
        .bind(&message.job_type)
        .bind(&message.payload_bytes)
        .bind(&message.codec)
        .bind(message.priority.as_u8() as i16)
        .bind(message.max_retries as i32)
        .bind(message.run_at)
        .bind(status)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.emit(JobEvent::Enqueued {
            job_id: job_id.clone(),
            tenant_id: ctx.tenant_id.clone(),
            queue: message.queue.clone(),
            job_type: message.job_type.clone(),
            at: now,
        });

        Ok(job_id)
    }

    async fn dequeue(&self, ctx: QueueCtx, queues: &[&str]) -> QueueResult<Option<LeasedJob>> {
        let now = Utc::now();

        for queue_name in queues {
            let mut tx = self.pool.begin().await?;

            let candidate: Option<PgJobRow> = sqlx::query_as(
                r#"
                SELECT * FROM pipeline_jobs
                WHERE tenant_id = $1 AND queue_name = $2
                  AND (
                        status = 'enqueued'
                     OR (status = 'scheduled' AND run_at <= $3)
                     OR (status = 'retrying' AND retry_at <= $3)
                  )
                ORDER BY priority DESC, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
                "#,
            )
            .bind(&ctx.tenant_id)
            .bind(*queue_name)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(row) = candidate else {
                tx.commit().await?;
                continue;
            };

            let lease_token = LeaseToken::new();
            let lease_until = now + self.lease_duration;
            let new_attempt = row.attempt + 1;

            let rows_affected = sqlx::query(
                r#"
                UPDATE pipeline_jobs
                SET status = 'processing', attempt = $1, lease_token = $2, lease_until = $3, updated_at = $4
                WHERE job_id = $5 AND tenant_id = $6
                "#,
            )
            .bind(new_attempt)
            .bind(lease_token.as_str())
            .bind(lease_until)
            .bind(now)
            .bind(&row.job_id)
            .bind(&ctx.tenant_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            tx.commit().await?;

            if rows_affected == 0 {
                // Lost a race to another worker between the select and the update; try the next queue.
                continue;
            }

            let mut record = row.into_record()?;
            record.attempt = new_attempt as u32;
            record.status = JobStatus::Processing { lease_until };
            record.lease_token = Some(lease_token.clone());
            record.lease_until = Some(lease_until);
            record.updated_at = now;

            self.emit(JobEvent::Leased {
                job_id: record.job_id.clone(),
                lease_until,
                at: now,
            });

            return Ok(Some(LeasedJob::new(record, lease_token, lease_until)));
        }

        Ok(None)
    }

    async fn ack_complete(
        &self,
        ctx: QueueCtx,
        job_id: JobId,
        lease_token: LeaseToken,
        _result_ref: Option<String>,
    ) -> QueueResult<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let row = self.fetch_for_update(&mut tx, &job_id, &ctx.tenant_id).await?;

        match row.status.as_str() {
            "canceled" => return Err(QueueError::JobCanceled),
            "completed" | "failed" => return Err(QueueError::JobAlreadyTerminal),
            _ => {}
        }
        if row.lease_token.as_deref() != Some(lease_token.as_str()) {
            return Err(QueueError::InvalidLeaseToken);
        }
        if let Some(lease_until) = row.lease_until {
            if now > lease_until {
                return Err(QueueError::LeaseExpired);
            }
        }

        sqlx::query(
            r#"
            UPDATE pipeline_jobs
            SET status = 'completed', completed_at = $1, lease_token = NULL, lease_until = NULL, updated_at = $1
            WHERE job_id = $2
            "#,
        )
        .bind(now)
        .bind(job_id.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.emit(JobEvent::Completed { job_id, at: now });
        Ok(())
    }

    async fn ack_fail(
        &self,
        ctx: QueueCtx,
        job_id: JobId,
        lease_token: LeaseToken,
        error: String,
        retry_at: Option<DateTime<Utc>>,
    ) -> QueueResult<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let row = self.fetch_for_update(&mut tx, &job_id, &ctx.tenant_id).await?;

        match row.status.as_str() {
            "completed" | "failed" | "canceled" => return Err(QueueError::JobAlreadyTerminal),
            _ => {}
        }
        if row.lease_token.as_deref() != Some(lease_token.as_str()) {
            return Err(QueueError::InvalidLeaseToken);
        }
        if let Some(lease_until) = row.lease_until {
            if now > lease_until {
                return Err(QueueError::LeaseExpired);
            }
        }

        if row.attempt as u32 >= row.max_retries as u32 {
            let message = format!("Max retries exceeded: {error}");
            sqlx::query(
                r#"
                UPDATE pipeline_jobs
                SET status = 'failed', failed_at = $1, last_error = $2,
                    lease_token = NULL, lease_until = NULL, updated_at = $1
                WHERE job_id = $3
                "#,
            )
            .bind(now)
            .bind(&message)
            .bind(job_id.as_str())
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            self.emit(JobEvent::Failed { job_id, error: message, at: now });
            return Ok(());
        }

        if let Some(retry_time) = retry_at {
            sqlx::query(
                r#"
                UPDATE pipeline_jobs
                SET status = 'retrying', retry_at = $1, attempt = attempt + 1, last_error = $2,
                    lease_token = NULL, lease_until = NULL, updated_at = $3
                WHERE job_id = $4
                "#,
            )
            .bind(retry_time)
            .bind(&error)
            .bind(now)
            .bind(job_id.as_str())
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            self.emit(JobEvent::Retrying { job_id, retry_at: retry_time, error, at: now });
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE pipeline_jobs
            SET status = 'failed', failed_at = $1, last_error = $2,
                lease_token = NULL, lease_until = NULL, updated_at = $1
            WHERE job_id = $3
            "#,
        )
        .bind(now)
        .bind(&error)
        .bind(job_id.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        self.emit(JobEvent::Failed { job_id, error, at: now });
        Ok(())
    }

    async fn heartbeat_extend(
        &self,
        ctx: QueueCtx,
        job_id: JobId,
        lease_token: LeaseToken,
        extra_time: std::time::Duration,
    ) -> QueueResult<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let row = self.fetch_for_update(&mut tx, &job_id, &ctx.tenant_id).await?;

        if row.status == "canceled" {
            return Err(QueueError::JobCanceled);
        }
        if row.lease_token.as_deref() != Some(lease_token.as_str()) {
            return Err(QueueError::InvalidLeaseToken);
        }

        if let Some(lease_until) = row.lease_until {
            let extended = lease_until
                + chrono::Duration::from_std(extra_time)
                    .map_err(|e| QueueError::Internal(e.to_string()))?;
            sqlx::query(
                r#"UPDATE pipeline_jobs SET lease_until = $1, updated_at = $2 WHERE job_id = $3"#,
            )
            .bind(extended)
            .bind(now)
            .bind(job_id.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn cancel(&self, ctx: QueueCtx, job_id: JobId) -> QueueResult<bool> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let row = self.fetch_for_update(&mut tx, &job_id, &ctx.tenant_id).await?;

        if matches!(row.status.as_str(), "completed" | "failed" | "canceled") {
            tx.commit().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE pipeline_jobs
            SET status = 'canceled', canceled_at = $1, lease_token = NULL, lease_until = NULL, updated_at = $1
            WHERE job_id = $2
            "#,
        )
        .bind(now)
        .bind(job_id.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.emit(JobEvent::Canceled { job_id, at: now });
        Ok(true)
    }

    async fn get_status(&self, ctx: QueueCtx, job_id: JobId) -> QueueResult<JobStatus> {
        let row: Option<PgJobRow> = sqlx::query_as(
            r#"SELECT * FROM pipeline_jobs WHERE job_id = $1 AND tenant_id = $2"#,
        )
        .bind(job_id.as_str())
        .bind(&ctx.tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        row.status()
    }

    async fn get_record(&self, ctx: QueueCtx, job_id: JobId) -> QueueResult<JobRecord> {
        let row: Option<PgJobRow> = sqlx::query_as(
            r#"SELECT * FROM pipeline_jobs WHERE job_id = $1 AND tenant_id = $2"#,
        )
        .bind(job_id.as_str())
        .bind(&ctx.tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        row.into_record()
    }

    fn event_stream(&self, _ctx: QueueCtx) -> BoxStream<JobEvent> {
        let receiver = self.event_broadcaster.subscribe();
        use tokio_stream::{wrappers::BroadcastStream, StreamExt};
        let stream = BroadcastStream::new(receiver).filter_map(|result| result.ok());
        Box::pin(stream)
    }

    fn capabilities(&self) -> QueueCapabilities {
        QueueCapabilities {
            delayed: true,
            scheduled_at: true,
            cancel: true,
            lease_extend: true,
            priority: true,
            idempotency: true,
            dead_letter_queue: false,
        }
    }
}
