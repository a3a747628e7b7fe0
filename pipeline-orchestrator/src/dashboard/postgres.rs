//! Postgres-backed dashboard cache + refresh queue.
//!
//! `dashboard_cache` holds one row per user, overwritten wholesale on each
//! refresh (`ON CONFLICT (user_id) DO UPDATE`). `dashboard_refresh_requests`
//! is the coalesced signal queue: `enqueue` is `ON CONFLICT DO NOTHING` so a
//! user already pending never gets a second row; `claim_batch` claims with
//! `SELECT ... FOR UPDATE SKIP LOCKED` and deletes the claimed rows in the
//! same transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::dashboard::{DashboardCacheStore, DashboardRefreshQueue, DashboardSnapshot};
use crate::error::OrchestratorResult;

#[derive(Debug, sqlx::FromRow)]
struct DashboardRow {
    user_id: Uuid,
    gauges: serde_json::Value,
    alerts: serde_json::Value,
    face_carousel: serde_json::Value,
    video_carousel: serde_json::Value,
    updated_at: DateTime<Utc>,
}

impl DashboardRow {
    fn into_snapshot(self) -> OrchestratorResult<DashboardSnapshot> {
        Ok(DashboardSnapshot {
            user_id: self.user_id,
            gauges: self.gauges,
            alerts: self.alerts,
            face_carousel: serde_json::from_value(self.face_carousel)?,
            video_carousel: serde_json::from_value(self.video_carousel)?,
            updated_at: self.updated_at,
        })
    }
}

pub struct PostgresDashboardCacheStore {
    pool: PgPool,
}

impl PostgresDashboardCacheStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DashboardCacheStore for PostgresDashboardCacheStore {
    async fn get(&self, user_id: Uuid) -> OrchestratorResult<Option<DashboardSnapshot>> {
        let row: Option<DashboardRow> =
            sqlx::query_as("SELECT * FROM dashboard_cache WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(DashboardRow::into_snapshot).transpose()
    }

    async fn put(&self, snapshot: DashboardSnapshot) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO dashboard_cache (
                user_id, gauges, alerts, face_carousel, video_carousel, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id) DO UPDATE SET
                gauges = EXCLUDED.gauges,
                alerts = EXCLUDED.alerts,
                face_carousel = EXCLUDED.face_carousel,
                video_carousel = EXCLUDED.video_carousel,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(snapshot.user_id)
        .bind(&snapshot.gauges)
        .bind(&snapshot.alerts)
        .bind(serde_json::to_value(&snapshot.face_carousel)?)
        .bind(serde_json::to_value(&snapshot.video_carousel)?)
        .bind(snapshot.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub struct PostgresDashboardRefreshQueue {
    pool: PgPool,
}

impl PostgresDashboardRefreshQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DashboardRefreshQueue for PostgresDashboardRefreshQueue {
    async fn enqueue(&self, user_id: Uuid) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO dashboard_refresh_requests (user_id, requested_at)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_batch(&self, batch_size: usize) -> OrchestratorResult<Vec<Uuid>> {
        let mut tx = self.pool.begin().await?;

        let claimed: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT user_id FROM dashboard_refresh_requests
            ORDER BY requested_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT $1
            "#,
        )
        .bind(batch_size as i64)
        .fetch_all(&mut *tx)
        .await?;

        let ids: Vec<Uuid> = claimed.into_iter().map(|(id,)| id).collect();
        if !ids.is_empty() {
            sqlx::query("DELETE FROM dashboard_refresh_requests WHERE user_id = ANY($1)")
                .bind(&ids)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(ids)
    }
}
