use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::provider::{FinishPatch, ProviderRun, ProviderRunStatus, ProviderRunsLedger};

#[derive(Debug, sqlx::FromRow)]
struct ProviderRunRow {
    id: Uuid,
    job_id: Uuid,
    provider: String,
    logical_step: String,
    attempt: i32,
    idempotency_key: String,
    provider_status: String,
    provider_job_id: Option<String>,
    request_json: serde_json::Value,
    response_json: Option<serde_json::Value>,
    meta_json: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ProviderRunRow {
    fn into_run(self) -> OrchestratorResult<ProviderRun> {
        Ok(ProviderRun {
            id: self.id,
            job_id: self.job_id,
            provider: self.provider,
            logical_step: self.logical_step,
            attempt: self.attempt as u32,
            idempotency_key: self.idempotency_key,
            provider_status: self.provider_status.parse()?,
            provider_job_id: self.provider_job_id,
            request_json: self.request_json,
            response_json: self.response_json,
            meta_json: self.meta_json,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub struct PostgresProviderRunsLedger {
    pool: PgPool,
}

impl PostgresProviderRunsLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProviderRunsLedger for PostgresProviderRunsLedger {
    async fn create_run(
        &self,
        job_id: Uuid,
        provider: &str,
        idempotency_key: String,
        request_json: serde_json::Value,
        meta_json: serde_json::Value,
    ) -> OrchestratorResult<Uuid> {
        let logical_step = idempotency_key.split(':').nth(2).unwrap_or_default().to_string();
        let attempt: i32 = idempotency_key
            .rsplit(':')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1);

        let row: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO provider_runs (
                id, job_id, provider, logical_step, attempt, idempotency_key,
                provider_status, request_json, meta_json, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, 'created', $7, $8, $9, $9)
            ON CONFLICT (idempotency_key) DO UPDATE
              SET updated_at = $9
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(provider)
        .bind(&logical_step)
        .bind(attempt)
        .bind(&idempotency_key)
        .bind(&request_json)
        .bind(&meta_json)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    async fn claim_next(
        &self,
        provider: &str,
        statuses: &[ProviderRunStatus],
    ) -> OrchestratorResult<Option<ProviderRun>> {
        let statuses: Vec<&'static str> = statuses.iter().map(|s| s.as_str()).collect();
        let mut tx = self.pool.begin().await?;

        let row: Option<ProviderRunRow> = sqlx::query_as(
            r#"
            SELECT * FROM provider_runs
            WHERE provider = $1 AND provider_status = ANY($2)
            ORDER BY created_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .bind(provider)
        .bind(&statuses)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        sqlx::query("UPDATE provider_runs SET provider_status = 'running', updated_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(row.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let mut run = row.into_run()?;
        run.provider_status = ProviderRunStatus::Running;
        Ok(Some(run))
    }

    async fn finish(&self, run_id: Uuid, patch: FinishPatch) -> OrchestratorResult<()> {
        let mut sets: Vec<String> = vec!["provider_status = $2".to_string(), "updated_at = $3".to_string()];
        let now = Utc::now();
        let mut idx = 4;

        let mut meta_patch = patch.meta_patch.unwrap_or_else(|| serde_json::json!({}));
        if let Some(error) = patch.error {
            if let serde_json::Value::Object(ref mut map) = meta_patch {
                map.insert("error".to_string(), serde_json::Value::String(error));
            }
        }

        // sqlx's static query! macros can't express this dynamic SET list
        // without a runtime-checked build; assemble the SQL string directly,
        // the same dynamic-patch approach `provider_runs_service.py` uses.
        if patch.provider_job_id.is_some() {
            sets.push(format!("provider_job_id = ${idx}"));
            idx += 1;
        }
        if patch.response_json.is_some() {
            sets.push(format!("response_json = ${idx}"));
            idx += 1;
        }
        let has_meta_patch = !meta_patch.as_object().map(|m| m.is_empty()).unwrap_or(true);
        if has_meta_patch {
            sets.push(format!("meta_json = COALESCE(meta_json, '{{}}'::jsonb) || ${idx}::jsonb"));
        }

        let sql = format!("UPDATE provider_runs SET {} WHERE id = $1", sets.join(", "));
        let mut q = sqlx::query(&sql).bind(run_id).bind(patch.provider_status.as_str()).bind(now);
        if let Some(provider_job_id) = patch.provider_job_id {
            q = q.bind(provider_job_id);
        }
        if let Some(response_json) = patch.response_json {
            q = q.bind(response_json);
        }
        if has_meta_patch {
            q = q.bind(meta_patch);
        }
        q.execute(&self.pool).await?;
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> OrchestratorResult<ProviderRun> {
        let row: ProviderRunRow = sqlx::query_as("SELECT * FROM provider_runs WHERE id = $1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchestratorError::Internal(format!("provider run {run_id} not found")))?;
        row.into_run()
    }

    async fn list_for_job(&self, job_id: Uuid) -> OrchestratorResult<Vec<ProviderRun>> {
        let rows: Vec<ProviderRunRow> =
            sqlx::query_as("SELECT * FROM provider_runs WHERE job_id = $1 ORDER BY created_at ASC")
                .bind(job_id)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(|r| r.into_run()).collect()
    }
}
