use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::job::{Job, JobStatus, JobStore, StudioType};

/// In-memory `JobStore` for tests and single-process development - the
/// direct analogue of `pipeline_queue::backend::memory::MemoryBackend`.
pub struct MemoryJobStore {
    jobs: Arc<RwLock<HashMap<Uuid, Job>>>,
    idempotency: Arc<RwLock<HashMap<(Uuid, &'static str, String), Uuid>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            idempotency: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn submit(
        &self,
        user_id: Uuid,
        studio_type: StudioType,
        request_hash: String,
        payload: serde_json::Value,
        meta: serde_json::Value,
    ) -> OrchestratorResult<Job> {
        let key = (user_id, studio_type.as_str(), request_hash.clone());

        // Fast path: existing row -> bump updated_at and return it.
        {
            let idempotency = self.idempotency.read();
            if let Some(existing_id) = idempotency.get(&key).copied() {
                drop(idempotency);
                let mut jobs = self.jobs.write();
                if let Some(job) = jobs.get_mut(&existing_id) {
                    job.updated_at = Utc::now();
                    return Ok(job.clone());
                }
            }
        }

        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            studio_type,
            status: JobStatus::Queued,
            user_id,
            request_hash,
            payload,
            meta,
            error_code: None,
            error_message: None,
            attempt_count: 0,
            next_run_at: Some(now),
            created_at: now,
            updated_at: now,
        };

        let mut idempotency = self.idempotency.write();
        // Re-check under the write lock: a racing submit may have inserted
        // between our read above and this write.
        if let Some(existing_id) = idempotency.get(&key).copied() {
            drop(idempotency);
            let jobs = self.jobs.read();
            return Ok(jobs.get(&existing_id).expect("idempotency row without job").clone());
        }

        idempotency.insert(key, job.id);
        self.jobs.write().insert(job.id, job.clone());
        Ok(job)
    }

    async fn claim(
        &self,
        studio_type: StudioType,
        batch_size: usize,
        stale_after: Option<std::time::Duration>,
    ) -> OrchestratorResult<Vec<Job>> {
        let now = Utc::now();
        let mut jobs = self.jobs.write();

        let mut eligible: Vec<Uuid> = jobs
            .values()
            .filter(|j| j.studio_type == studio_type)
            .filter(|j| match j.status {
                JobStatus::Queued => j.next_run_at.map(|t| t <= now).unwrap_or(true),
                JobStatus::Running => stale_after
                    .map(|stale| now.signed_duration_since(j.updated_at) > chrono::Duration::from_std(stale).unwrap())
                    .unwrap_or(false),
                _ => false,
            })
            .map(|j| j.id)
            .collect();

        eligible.sort_by_key(|id| {
            let j = &jobs[id];
            (j.next_run_at.unwrap_or(j.created_at), j.created_at)
        });
        eligible.truncate(batch_size);

        let mut claimed = Vec::with_capacity(eligible.len());
        for id in eligible {
            let job = jobs.get_mut(&id).expect("eligible id vanished");
            job.status = JobStatus::Running;
            job.attempt_count += 1;
            job.updated_at = now;
            claimed.push(job.clone());
        }
        Ok(claimed)
    }

    async fn get(&self, job_id: Uuid) -> OrchestratorResult<Job> {
        self.jobs
            .read()
            .get(&job_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::Internal(format!("job {job_id} not found")))
    }

    async fn mark_succeeded(&self, job_id: Uuid) -> OrchestratorResult<()> {
        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| OrchestratorError::Internal(format!("job {job_id} not found")))?;
        job.status = JobStatus::Succeeded;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_stitching(&self, job_id: Uuid) -> OrchestratorResult<()> {
        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| OrchestratorError::Internal(format!("job {job_id} not found")))?;
        job.status = JobStatus::Stitching;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        error_code: &str,
        error_message: &str,
    ) -> OrchestratorResult<()> {
        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| OrchestratorError::Internal(format!("job {job_id} not found")))?;
        job.status = JobStatus::Failed;
        job.error_code = Some(error_code.to_string());
        job.error_message = Some(error_message.to_string());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn requeue(
        &self,
        job_id: Uuid,
        delay: std::time::Duration,
        error_code: &str,
        error_message: &str,
    ) -> OrchestratorResult<()> {
        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| OrchestratorError::Internal(format!("job {job_id} not found")))?;
        let now = Utc::now();
        job.status = JobStatus::Queued;
        job.next_run_at = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
        job.error_code = Some(error_code.to_string());
        job.error_message = Some(error_message.to_string());
        job.updated_at = now;
        Ok(())
    }

    async fn cancel(&self, job_id: Uuid) -> OrchestratorResult<bool> {
        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| OrchestratorError::Internal(format!("job {job_id} not found")))?;
        if job.status.is_terminal() {
            return Ok(false);
        }
        job.status = JobStatus::Canceled;
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn patch_meta(&self, job_id: Uuid, patch: serde_json::Value) -> OrchestratorResult<Job> {
        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| OrchestratorError::Internal(format!("job {job_id} not found")))?;
        if let (serde_json::Value::Object(base), serde_json::Value::Object(patch)) =
            (&mut job.meta, patch)
        {
            for (k, v) in patch {
                if v.is_null() {
                    base.remove(&k);
                } else {
                    base.insert(k, v);
                }
            }
        }
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn due_count(&self, studio_type: StudioType, now: DateTime<Utc>) -> OrchestratorResult<u64> {
        let jobs = self.jobs.read();
        Ok(jobs
            .values()
            .filter(|j| j.studio_type == studio_type)
            .filter(|j| j.status == JobStatus::Queued && j.next_run_at.map(|t| t <= now).unwrap_or(true))
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn submit_is_idempotent() {
        let store = MemoryJobStore::new();
        let user = Uuid::new_v4();
        let payload = json!({"prompt": "a", "variants": 4});
        let hash = crate::job::request_hash(&user, &payload);

        let a = store
            .submit(user, StudioType::Face, hash.clone(), payload.clone(), json!({}))
            .await
            .unwrap();
        let b = store
            .submit(user, StudioType::Face, hash, payload, json!({}))
            .await
            .unwrap();

        assert_eq!(a.id, b.id);
        assert_eq!(store.jobs.read().len(), 1);
    }

    #[tokio::test]
    async fn claim_transitions_to_running_and_increments_attempt() {
        let store = MemoryJobStore::new();
        let user = Uuid::new_v4();
        store
            .submit(user, StudioType::Audio, "h1".into(), json!({}), json!({}))
            .await
            .unwrap();

        let claimed = store.claim(StudioType::Audio, 10, None).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, JobStatus::Running);
        assert_eq!(claimed[0].attempt_count, 1);

        // Not eligible again until requeued or stale.
        let claimed_again = store.claim(StudioType::Audio, 10, None).await.unwrap();
        assert!(claimed_again.is_empty());
    }

    #[tokio::test]
    async fn requeue_makes_job_eligible_after_delay() {
        let store = MemoryJobStore::new();
        let user = Uuid::new_v4();
        let job = store
            .submit(user, StudioType::Fusion, "h2".into(), json!({}), json!({}))
            .await
            .unwrap();
        store.claim(StudioType::Fusion, 10, None).await.unwrap();
        store
            .requeue(job.id, std::time::Duration::from_secs(0), "provider_5xx", "boom")
            .await
            .unwrap();

        let reclaimed = store.claim(StudioType::Fusion, 10, None).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].attempt_count, 2);
        assert_eq!(reclaimed[0].error_code.as_deref(), Some("provider_5xx"));
    }

    #[tokio::test]
    async fn stale_running_job_is_reclaimable() {
        let store = MemoryJobStore::new();
        let user = Uuid::new_v4();
        store
            .submit(user, StudioType::Face, "h3".into(), json!({}), json!({}))
            .await
            .unwrap();
        let claimed = store.claim(StudioType::Face, 10, None).await.unwrap();
        let id = claimed[0].id;

        // Simulate a crash: the row stays `running` with a stale updated_at.
        {
            let mut jobs = store.jobs.write();
            jobs.get_mut(&id).unwrap().updated_at = Utc::now() - chrono::Duration::hours(1);
        }

        let reclaimed = store
            .claim(StudioType::Face, 10, Some(std::time::Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].attempt_count, 2);
    }
}
