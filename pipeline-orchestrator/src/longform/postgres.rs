use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::longform::chunking::ScriptChunk;
use crate::longform::{
    LongformJob, LongformJobStatus, LongformSegment, LongformStore, SegmentStatus, VoiceGenderMode,
};

#[derive(Debug, sqlx::FromRow)]
struct LongformJobRow {
    id: Uuid,
    job_id: Uuid,
    status: String,
    segments_total: i32,
    segments_done: i32,
    segment_seconds: i32,
    max_segment_seconds: i32,
    voice_config: serde_json::Value,
    voice_gender_mode: String,
    worker_credential: String,
    final_storage_path: Option<String>,
    final_url: Option<String>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl LongformJobRow {
    fn into_job(self) -> OrchestratorResult<LongformJob> {
        Ok(LongformJob {
            id: self.id,
            job_id: self.job_id,
            status: self.status.parse()?,
            segments_total: self.segments_total as u32,
            segments_done: self.segments_done as u32,
            segment_seconds: self.segment_seconds as u32,
            max_segment_seconds: self.max_segment_seconds as u32,
            voice_config: self.voice_config,
            voice_gender_mode: self.voice_gender_mode.parse()?,
            worker_credential: self.worker_credential,
            final_storage_path: self.final_storage_path,
            final_url: self.final_url,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LongformSegmentRow {
    id: Uuid,
    longform_job_id: Uuid,
    segment_index: i32,
    script_text: String,
    status: String,
    attempt_count: i32,
    tts_job_id: Option<String>,
    audio_url: Option<String>,
    audio_storage_path: Option<String>,
    fusion_job_id: Option<String>,
    video_url: Option<String>,
    video_storage_path: Option<String>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl LongformSegmentRow {
    fn into_segment(self) -> OrchestratorResult<LongformSegment> {
        Ok(LongformSegment {
            id: self.id,
            longform_job_id: self.longform_job_id,
            segment_index: self.segment_index as u32,
            script_text: self.script_text,
            status: self.status.parse()?,
            attempt_count: self.attempt_count as u32,
            tts_job_id: self.tts_job_id,
            audio_url: self.audio_url,
            audio_storage_path: self.audio_storage_path,
            fusion_job_id: self.fusion_job_id,
            video_url: self.video_url,
            video_storage_path: self.video_storage_path,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub struct PostgresLongformStore {
    pool: PgPool,
}

impl PostgresLongformStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LongformStore for PostgresLongformStore {
    async fn submit(
        &self,
        job_id: Uuid,
        chunks: &[ScriptChunk],
        segment_seconds: u32,
        max_segment_seconds: u32,
        voice_config: serde_json::Value,
        voice_gender_mode: VoiceGenderMode,
        worker_credential: String,
    ) -> OrchestratorResult<LongformJob> {
        let now = Utc::now();
        let longform_job_id = Uuid::new_v4();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO longform_jobs (
                id, job_id, status, segments_total, segments_done,
                segment_seconds, max_segment_seconds, voice_config,
                voice_gender_mode, worker_credential, created_at, updated_at
            ) VALUES ($1, $2, 'running', $3, 0, $4, $5, $6, $7, $8, $9, $9)
            "#,
        )
        .bind(longform_job_id)
        .bind(job_id)
        .bind(chunks.len() as i32)
        .bind(segment_seconds as i32)
        .bind(max_segment_seconds as i32)
        .bind(&voice_config)
        .bind(voice_gender_mode.as_str())
        .bind(&worker_credential)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO longform_segments (
                    id, longform_job_id, segment_index, script_text, status,
                    attempt_count, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, 'queued', 0, $5, $5)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(longform_job_id)
            .bind(chunk.index as i32)
            .bind(&chunk.text)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        self.get_job(job_id).await
    }

    async fn get_job(&self, job_id: Uuid) -> OrchestratorResult<LongformJob> {
        let row: LongformJobRow = sqlx::query_as("SELECT * FROM longform_jobs WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchestratorError::Internal(format!("longform job for {job_id} not found")))?;
        row.into_job()
    }

    async fn list_segments(&self, longform_job_id: Uuid) -> OrchestratorResult<Vec<LongformSegment>> {
        let rows: Vec<LongformSegmentRow> = sqlx::query_as(
            "SELECT * FROM longform_segments WHERE longform_job_id = $1 ORDER BY segment_index ASC",
        )
        .bind(longform_job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|r| r.into_segment()).collect()
    }

    async fn claim_segments(
        &self,
        longform_job_id: Uuid,
        max_inflight: usize,
    ) -> OrchestratorResult<Vec<LongformSegment>> {
        let mut tx = self.pool.begin().await?;

        let inflight: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM longform_segments
            WHERE longform_job_id = $1 AND status IN ('audio_running', 'video_running')
            "#,
        )
        .bind(longform_job_id)
        .fetch_one(&mut *tx)
        .await?;

        let capacity = (max_inflight as i64 - inflight).max(0);

        let rows: Vec<LongformSegmentRow> = sqlx::query_as(
            r#"
            SELECT * FROM longform_segments
            WHERE longform_job_id = $1 AND status IN ('queued', 'audio_running', 'video_running')
            ORDER BY segment_index ASC
            FOR UPDATE SKIP LOCKED
            LIMIT $2
            "#,
        )
        .bind(longform_job_id)
        .bind(capacity)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        rows.into_iter().map(|r| r.into_segment()).collect()
    }

    async fn update_segment(&self, segment: LongformSegment) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            UPDATE longform_segments SET
                status = $1, attempt_count = $2, tts_job_id = $3, audio_url = $4,
                audio_storage_path = $5, fusion_job_id = $6, video_url = $7,
                video_storage_path = $8, last_error = $9, updated_at = $10
            WHERE id = $11
            "#,
        )
        .bind(segment.status.as_str())
        .bind(segment.attempt_count as i32)
        .bind(&segment.tts_job_id)
        .bind(&segment.audio_url)
        .bind(&segment.audio_storage_path)
        .bind(&segment.fusion_job_id)
        .bind(&segment.video_url)
        .bind(&segment.video_storage_path)
        .bind(&segment.last_error)
        .bind(Utc::now())
        .bind(segment.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_job_status(
        &self,
        longform_job_id: Uuid,
        status: LongformJobStatus,
        last_error: Option<String>,
    ) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            UPDATE longform_jobs
            SET status = $1, last_error = COALESCE($2, last_error), updated_at = $3
            WHERE id = $4
            "#,
        )
        .bind(status.as_str())
        .bind(&last_error)
        .bind(Utc::now())
        .bind(longform_job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_job_counts(&self, longform_job_id: Uuid, total: u32, done: u32) -> OrchestratorResult<()> {
        sqlx::query(
            "UPDATE longform_jobs SET segments_total = $1, segments_done = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(total as i32)
        .bind(done as i32)
        .bind(Utc::now())
        .bind(longform_job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_job_final(
        &self,
        longform_job_id: Uuid,
        final_storage_path: String,
        final_url: String,
    ) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            UPDATE longform_jobs
            SET final_storage_path = $1, final_url = $2, updated_at = $3
            WHERE id = $4
            "#,
        )
        .bind(final_storage_path)
        .bind(final_url)
        .bind(Utc::now())
        .bind(longform_job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn any_failed(&self, longform_job_id: Uuid) -> OrchestratorResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM longform_segments WHERE longform_job_id = $1 AND status = 'failed'",
        )
        .bind(longform_job_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn count_succeeded(&self, longform_job_id: Uuid) -> OrchestratorResult<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM longform_segments WHERE longform_job_id = $1 AND status = 'succeeded'",
        )
        .bind(longform_job_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u32)
    }
}
