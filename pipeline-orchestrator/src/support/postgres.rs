//! Postgres-backed `SupportAuditLog`.
//!
//! `append` takes a row-level advisory lock on the session (`pg_advisory_xact_lock`
//! keyed on the session uuid's low 64 bits) for the duration of the
//! transaction so two concurrent appenders to the same session can never
//! both read the same `prev_hash` - the second waits for the first's
//! transaction to commit, same serialization point `support_audit.py`'s
//! per-session lock gives under Postgres row locking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::error::OrchestratorResult;
use crate::support::{
    compute_event_hash, validate_impersonation, AppendEventRequest, SupportAuditLog, SupportEvent,
};

#[derive(Debug, sqlx::FromRow)]
struct SupportEventRow {
    id: Uuid,
    session_id: Uuid,
    kind: String,
    actor_type: String,
    actor_id: Uuid,
    impersonated_user_id: Option<Uuid>,
    payload: serde_json::Value,
    prev_hash: Option<String>,
    event_hash: String,
    project_id: Option<Uuid>,
    job_id: Option<Uuid>,
    surface: Option<String>,
    created_at: DateTime<Utc>,
}

impl SupportEventRow {
    fn into_event(self) -> OrchestratorResult<SupportEvent> {
        Ok(SupportEvent {
            id: self.id,
            session_id: self.session_id,
            kind: self.kind.parse()?,
            actor_type: self.actor_type.parse()?,
            actor_id: self.actor_id,
            impersonated_user_id: self.impersonated_user_id,
            payload: self.payload,
            prev_hash: self.prev_hash,
            event_hash: self.event_hash,
            project_id: self.project_id,
            job_id: self.job_id,
            surface: self.surface,
            created_at: self.created_at,
        })
    }
}

pub struct PostgresSupportAuditLog {
    pool: PgPool,
}

impl PostgresSupportAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn session_lock_key(session_id: Uuid) -> i64 {
    let bytes = session_id.as_bytes();
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[8..16]);
    i64::from_le_bytes(buf)
}

#[async_trait]
impl SupportAuditLog for PostgresSupportAuditLog {
    async fn append(&self, req: AppendEventRequest) -> OrchestratorResult<SupportEvent> {
        validate_impersonation(&req)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(session_lock_key(req.session_id))
            .execute(&mut *tx)
            .await?;

        let prev: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT event_hash FROM support_events
            WHERE session_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(req.session_id)
        .fetch_optional(&mut *tx)
        .await?;
        let prev_hash = prev.map(|(h,)| h);

        let created_at = Utc::now();
        let event_hash = compute_event_hash(
            req.session_id,
            prev_hash.as_deref(),
            &req.payload,
            req.actor_id,
            req.kind,
            created_at,
        );
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO support_events (
                id, session_id, kind, actor_type, actor_id, impersonated_user_id,
                payload, prev_hash, event_hash, project_id, job_id, surface, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(id)
        .bind(req.session_id)
        .bind(req.kind.as_str())
        .bind(req.actor_type.as_str())
        .bind(req.actor_id)
        .bind(req.impersonated_user_id)
        .bind(&req.payload)
        .bind(&prev_hash)
        .bind(&event_hash)
        .bind(req.project_id)
        .bind(req.job_id)
        .bind(&req.surface)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(SupportEvent {
            id,
            session_id: req.session_id,
            kind: req.kind,
            actor_type: req.actor_type,
            actor_id: req.actor_id,
            impersonated_user_id: req.impersonated_user_id,
            payload: req.payload,
            prev_hash,
            event_hash,
            project_id: req.project_id,
            job_id: req.job_id,
            surface: req.surface,
            created_at,
        })
    }

    async fn list_session(&self, session_id: Uuid) -> OrchestratorResult<Vec<SupportEvent>> {
        let rows: Vec<SupportEventRow> = sqlx::query_as(
            "SELECT * FROM support_events WHERE session_id = $1 ORDER BY created_at ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SupportEventRow::into_event).collect()
    }

    async fn list_by_context(
        &self,
        project_id: Option<Uuid>,
        job_id: Option<Uuid>,
        user_id: Option<Uuid>,
        surface: Option<&str>,
    ) -> OrchestratorResult<Vec<SupportEvent>> {
        let rows: Vec<SupportEventRow> = sqlx::query_as(
            r#"
            SELECT * FROM support_events
            WHERE ($1::uuid IS NULL OR project_id = $1)
              AND ($2::uuid IS NULL OR job_id = $2)
              AND ($3::uuid IS NULL OR actor_id = $3 OR impersonated_user_id = $3)
              AND ($4::text IS NULL OR surface = $4)
            ORDER BY created_at ASC
            "#,
        )
        .bind(project_id)
        .bind(job_id)
        .bind(user_id)
        .bind(surface)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SupportEventRow::into_event).collect()
    }
}
