use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::longform::chunking::ScriptChunk;
use crate::longform::{
    LongformJob, LongformJobStatus, LongformSegment, LongformStore, SegmentStatus, VoiceGenderMode,
};

pub struct MemoryLongformStore {
    jobs: Arc<RwLock<HashMap<Uuid, LongformJob>>>,
    segments: Arc<RwLock<HashMap<Uuid, LongformSegment>>>,
}

impl MemoryLongformStore {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            segments: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryLongformStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LongformStore for MemoryLongformStore {
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
        let job = LongformJob {
            id: longform_job_id,
            job_id,
            status: LongformJobStatus::Running,
            segments_total: chunks.len() as u32,
            segments_done: 0,
            segment_seconds,
            max_segment_seconds,
            voice_config,
            voice_gender_mode,
            worker_credential,
            final_storage_path: None,
            final_url: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.jobs.write().insert(longform_job_id, job.clone());

        let mut segments = self.segments.write();
        for chunk in chunks {
            let segment = LongformSegment {
                id: Uuid::new_v4(),
                longform_job_id,
                segment_index: chunk.index as u32,
                script_text: chunk.text.clone(),
                status: SegmentStatus::Queued,
                attempt_count: 0,
                tts_job_id: None,
                audio_url: None,
                audio_storage_path: None,
                fusion_job_id: None,
                video_url: None,
                video_storage_path: None,
                last_error: None,
                created_at: now,
                updated_at: now,
            };
            segments.insert(segment.id, segment);
        }

        Ok(job)
    }

    async fn get_job(&self, job_id: Uuid) -> OrchestratorResult<LongformJob> {
        self.jobs
            .read()
            .values()
            .find(|j| j.job_id == job_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::Internal(format!("longform job for {job_id} not found")))
    }

    async fn list_segments(&self, longform_job_id: Uuid) -> OrchestratorResult<Vec<LongformSegment>> {
        let mut segs: Vec<LongformSegment> = self
            .segments
            .read()
            .values()
            .filter(|s| s.longform_job_id == longform_job_id)
            .cloned()
            .collect();
        segs.sort_by_key(|s| s.segment_index);
        Ok(segs)
    }

    async fn claim_segments(
        &self,
        longform_job_id: Uuid,
        max_inflight: usize,
    ) -> OrchestratorResult<Vec<LongformSegment>> {
        let segments = self.segments.read();
        let inflight = segments
            .values()
            .filter(|s| s.longform_job_id == longform_job_id)
            .filter(|s| matches!(s.status, SegmentStatus::AudioRunning | SegmentStatus::VideoRunning))
            .count();
        let capacity = max_inflight.saturating_sub(inflight);

        let mut pending: Vec<LongformSegment> = segments
            .values()
            .filter(|s| s.longform_job_id == longform_job_id)
            .filter(|s| {
                matches!(
                    s.status,
                    SegmentStatus::Queued | SegmentStatus::AudioRunning | SegmentStatus::VideoRunning
                )
            })
            .cloned()
            .collect();
        pending.sort_by_key(|s| s.segment_index);
        pending.truncate(capacity);
        Ok(pending)
    }

    async fn update_segment(&self, segment: LongformSegment) -> OrchestratorResult<()> {
        self.segments.write().insert(segment.id, segment);
        Ok(())
    }

    async fn set_job_status(
        &self,
        longform_job_id: Uuid,
        status: LongformJobStatus,
        last_error: Option<String>,
    ) -> OrchestratorResult<()> {
        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(&longform_job_id)
            .ok_or_else(|| OrchestratorError::Internal(format!("longform job {longform_job_id} not found")))?;
        job.status = status;
        if last_error.is_some() {
            job.last_error = last_error;
        }
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn set_job_counts(&self, longform_job_id: Uuid, total: u32, done: u32) -> OrchestratorResult<()> {
        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(&longform_job_id)
            .ok_or_else(|| OrchestratorError::Internal(format!("longform job {longform_job_id} not found")))?;
        job.segments_total = total;
        job.segments_done = done;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn set_job_final(
        &self,
        longform_job_id: Uuid,
        final_storage_path: String,
        final_url: String,
    ) -> OrchestratorResult<()> {
        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(&longform_job_id)
            .ok_or_else(|| OrchestratorError::Internal(format!("longform job {longform_job_id} not found")))?;
        job.final_storage_path = Some(final_storage_path);
        job.final_url = Some(final_url);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn any_failed(&self, longform_job_id: Uuid) -> OrchestratorResult<bool> {
        Ok(self
            .segments
            .read()
            .values()
            .any(|s| s.longform_job_id == longform_job_id && s.status == SegmentStatus::Failed))
    }

    async fn count_succeeded(&self, longform_job_id: Uuid) -> OrchestratorResult<u32> {
        Ok(self
            .segments
            .read()
            .values()
            .filter(|s| s.longform_job_id == longform_job_id && s.status == SegmentStatus::Succeeded)
            .count() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::longform::chunking::ScriptChunk;

    fn chunk(index: usize) -> ScriptChunk {
        ScriptChunk {
            index,
            text: format!("segment {index}"),
            duration_sec: 30,
        }
    }

    #[tokio::test]
    async fn submit_creates_one_segment_per_chunk() {
        let store = MemoryLongformStore::new();
        let job_id = Uuid::new_v4();
        let chunks = vec![chunk(0), chunk(1), chunk(2)];
        let job = store
            .submit(
                job_id,
                &chunks,
                60,
                120,
                serde_json::json!({}),
                VoiceGenderMode::Auto,
                "Bearer svc-token".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(job.segments_total, 3);

        let segments = store.list_segments(job.id).await.unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].segment_index, 0);
    }

    #[tokio::test]
    async fn claim_segments_respects_inflight_cap() {
        let store = MemoryLongformStore::new();
        let job_id = Uuid::new_v4();
        let chunks = vec![chunk(0), chunk(1), chunk(2), chunk(3), chunk(4)];
        let job = store
            .submit(
                job_id,
                &chunks,
                60,
                120,
                serde_json::json!({}),
                VoiceGenderMode::Auto,
                "Bearer svc-token".to_string(),
            )
            .await
            .unwrap();

        let claimed = store.claim_segments(job.id, 2).await.unwrap();
        assert_eq!(claimed.len(), 2);

        for mut seg in claimed {
            seg.status = SegmentStatus::AudioRunning;
            store.update_segment(seg).await.unwrap();
        }

        let claimed_again = store.claim_segments(job.id, 2).await.unwrap();
        assert!(claimed_again.is_empty());
    }
}
