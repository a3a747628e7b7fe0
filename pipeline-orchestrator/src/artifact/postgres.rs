use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::artifact::{Artifact, ArtifactKind, ArtifactStore};

#[derive(Debug, sqlx::FromRow)]
struct ArtifactRow {
    id: Uuid,
    job_id: Uuid,
    kind: String,
    container: String,
    storage_path: String,
    size_bytes: Option<i64>,
    content_type: Option<String>,
    meta: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl ArtifactRow {
    fn into_artifact(self) -> OrchestratorResult<Artifact> {
        Ok(Artifact {
            id: self.id,
            job_id: self.job_id,
            kind: self.kind.parse::<ArtifactKind>()?,
            container: self.container,
            storage_path: self.storage_path,
            size_bytes: self.size_bytes.map(|v| v as u64),
            content_type: self.content_type,
            meta: self.meta,
            created_at: self.created_at,
        })
    }
}

pub struct PostgresArtifactStore {
    pool: PgPool,
}

impl PostgresArtifactStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArtifactStore for PostgresArtifactStore {
    async fn record(
        &self,
        job_id: Uuid,
        kind: ArtifactKind,
        container: String,
        storage_path: String,
        size_bytes: Option<u64>,
        content_type: Option<String>,
        meta: serde_json::Value,
    ) -> OrchestratorResult<Artifact> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO artifacts (
                id, job_id, kind, container, storage_path, size_bytes, content_type, meta, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(id)
        .bind(job_id)
        .bind(kind.as_str())
        .bind(&container)
        .bind(&storage_path)
        .bind(size_bytes.map(|v| v as i64))
        .bind(&content_type)
        .bind(&meta)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Artifact {
            id,
            job_id,
            kind,
            container,
            storage_path,
            size_bytes,
            content_type,
            meta,
            created_at: now,
        })
    }

    async fn get(&self, artifact_id: Uuid) -> OrchestratorResult<Artifact> {
        let row: ArtifactRow = sqlx::query_as("SELECT * FROM artifacts WHERE id = $1")
            .bind(artifact_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchestratorError::Internal(format!("artifact {artifact_id} not found")))?;
        row.into_artifact()
    }

    async fn list_for_job(&self, job_id: Uuid) -> OrchestratorResult<Vec<Artifact>> {
        let rows: Vec<ArtifactRow> =
            sqlx::query_as("SELECT * FROM artifacts WHERE job_id = $1 ORDER BY created_at ASC")
                .bind(job_id)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(|r| r.into_artifact()).collect()
    }
}
