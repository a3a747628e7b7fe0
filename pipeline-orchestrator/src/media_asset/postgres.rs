use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::artifact::ArtifactKind;
use crate::error::OrchestratorResult;
use crate::media_asset::{MediaAsset, MediaAssetStore};

#[derive(Debug, sqlx::FromRow)]
struct MediaAssetRow {
    id: Uuid,
    user_id: Uuid,
    kind: String,
    container: String,
    storage_path: String,
    content_type: Option<String>,
    size_bytes: Option<i64>,
    sha256: Option<String>,
    duration_ms: Option<i64>,
    meta: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl MediaAssetRow {
    fn into_asset(self) -> OrchestratorResult<MediaAsset> {
        Ok(MediaAsset {
            id: self.id,
            user_id: self.user_id,
            kind: self.kind.parse()?,
            container: self.container,
            storage_path: self.storage_path,
            content_type: self.content_type,
            size_bytes: self.size_bytes.map(|v| v as u64),
            sha256: self.sha256,
            duration_ms: self.duration_ms.map(|v| v as u64),
            meta: self.meta,
            created_at: self.created_at,
        })
    }
}

pub struct PostgresMediaAssetStore {
    pool: PgPool,
}

impl PostgresMediaAssetStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MediaAssetStore for PostgresMediaAssetStore {
    async fn record(
        &self,
        user_id: Uuid,
        kind: ArtifactKind,
        container: String,
        storage_path: String,
        content_type: Option<String>,
        size_bytes: Option<u64>,
        sha256: Option<String>,
        duration_ms: Option<u64>,
        meta: serde_json::Value,
    ) -> OrchestratorResult<MediaAsset> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO media_assets (
                id, user_id, kind, container, storage_path, content_type,
                size_bytes, sha256, duration_ms, meta, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(kind.as_str())
        .bind(&container)
        .bind(&storage_path)
        .bind(&content_type)
        .bind(size_bytes.map(|v| v as i64))
        .bind(&sha256)
        .bind(duration_ms.map(|v| v as i64))
        .bind(&meta)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(MediaAsset {
            id,
            user_id,
            kind,
            container,
            storage_path,
            content_type,
            size_bytes,
            sha256,
            duration_ms,
            meta,
            created_at: now,
        })
    }

    async fn get(&self, asset_id: Uuid) -> OrchestratorResult<MediaAsset> {
        let row: MediaAssetRow = sqlx::query_as("SELECT * FROM media_assets WHERE id = $1")
            .bind(asset_id)
            .fetch_one(&self.pool)
            .await?;
        row.into_asset()
    }

    async fn list_for_user(&self, user_id: Uuid, kind: Option<ArtifactKind>) -> OrchestratorResult<Vec<MediaAsset>> {
        let rows: Vec<MediaAssetRow> = sqlx::query_as(
            r#"
            SELECT * FROM media_assets
            WHERE user_id = $1 AND ($2::text IS NULL OR kind = $2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .bind(kind.map(|k| k.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MediaAssetRow::into_asset).collect()
    }

    async fn delete(&self, asset_id: Uuid) -> OrchestratorResult<()> {
        sqlx::query("DELETE FROM media_assets WHERE id = $1")
            .bind(asset_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
