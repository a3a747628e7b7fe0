use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::provider::{FinishPatch, ProviderRun, ProviderRunStatus, ProviderRunsLedger};

pub struct MemoryProviderRunsLedger {
    runs: Arc<RwLock<HashMap<Uuid, ProviderRun>>>,
    by_key: Arc<RwLock<HashMap<String, Uuid>>>,
}

impl MemoryProviderRunsLedger {
    pub fn new() -> Self {
        Self {
            runs: Arc::new(RwLock::new(HashMap::new())),
            by_key: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryProviderRunsLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderRunsLedger for MemoryProviderRunsLedger {
    async fn create_run(
        &self,
        job_id: Uuid,
        provider: &str,
        idempotency_key: String,
        request_json: serde_json::Value,
        meta_json: serde_json::Value,
    ) -> OrchestratorResult<Uuid> {
        let mut by_key = self.by_key.write();
        if let Some(&existing_id) = by_key.get(&idempotency_key) {
            let mut runs = self.runs.write();
            if let Some(run) = runs.get_mut(&existing_id) {
                run.updated_at = Utc::now();
            }
            return Ok(existing_id);
        }

        let now = Utc::now();
        let run = ProviderRun {
            id: Uuid::new_v4(),
            job_id,
            provider: provider.to_string(),
            logical_step: idempotency_key
                .split(':')
                .nth(2)
                .unwrap_or_default()
                .to_string(),
            attempt: idempotency_key
                .rsplit(':')
                .next()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
            idempotency_key: idempotency_key.clone(),
            provider_status: ProviderRunStatus::Created,
            provider_job_id: None,
            request_json,
            response_json: None,
            meta_json,
            created_at: now,
            updated_at: now,
        };
        by_key.insert(idempotency_key, run.id);
        self.runs.write().insert(run.id, run.clone());
        Ok(run.id)
    }

    async fn claim_next(
        &self,
        provider: &str,
        statuses: &[ProviderRunStatus],
    ) -> OrchestratorResult<Option<ProviderRun>> {
        let mut runs = self.runs.write();
        let mut candidates: Vec<&mut ProviderRun> = runs
            .values_mut()
            .filter(|r| r.provider == provider && statuses.contains(&r.provider_status))
            .collect();
        candidates.sort_by_key(|r| r.created_at);

        if let Some(run) = candidates.into_iter().next() {
            run.provider_status = ProviderRunStatus::Running;
            run.updated_at = Utc::now();
            return Ok(Some(run.clone()));
        }
        Ok(None)
    }

    async fn finish(&self, run_id: Uuid, patch: FinishPatch) -> OrchestratorResult<()> {
        let mut runs = self.runs.write();
        let run = runs
            .get_mut(&run_id)
            .ok_or_else(|| OrchestratorError::Internal(format!("provider run {run_id} not found")))?;

        run.provider_status = patch.provider_status;
        if let Some(provider_job_id) = patch.provider_job_id {
            run.provider_job_id = Some(provider_job_id);
        }
        if let Some(response_json) = patch.response_json {
            run.response_json = Some(response_json);
        }

        let mut meta_patch = patch.meta_patch;
        if let Some(error) = patch.error {
            let mut m = meta_patch.unwrap_or_else(|| serde_json::json!({}));
            if let serde_json::Value::Object(ref mut map) = m {
                map.insert("error".to_string(), serde_json::Value::String(error));
            }
            meta_patch = Some(m);
        }

        if let Some(serde_json::Value::Object(patch_map)) = meta_patch {
            if let serde_json::Value::Object(ref mut base) = run.meta_json {
                for (k, v) in patch_map {
                    base.insert(k, v);
                }
            }
        }

        run.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> OrchestratorResult<ProviderRun> {
        self.runs
            .read()
            .get(&run_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::Internal(format!("provider run {run_id} not found")))
    }

    async fn list_for_job(&self, job_id: Uuid) -> OrchestratorResult<Vec<ProviderRun>> {
        Ok(self
            .runs
            .read()
            .values()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_run_is_idempotent_on_key() {
        let ledger = MemoryProviderRunsLedger::new();
        let job_id = Uuid::new_v4();
        let key = crate::provider::idempotency_key("svc-tts", job_id, "synthesize", 1);

        let a = ledger
            .create_run(job_id, "svc-tts", key.clone(), serde_json::json!({}), serde_json::json!({}))
            .await
            .unwrap();
        let b = ledger
            .create_run(job_id, "svc-tts", key, serde_json::json!({}), serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn finish_folds_error_into_meta() {
        let ledger = MemoryProviderRunsLedger::new();
        let job_id = Uuid::new_v4();
        let key = crate::provider::idempotency_key("svc-tts", job_id, "synthesize", 1);
        let run_id = ledger
            .create_run(job_id, "svc-tts", key, serde_json::json!({}), serde_json::json!({}))
            .await
            .unwrap();

        ledger
            .finish(run_id, FinishPatch::failed("upstream timed out"))
            .await
            .unwrap();

        let run = ledger.get(run_id).await.unwrap();
        assert_eq!(run.provider_status, ProviderRunStatus::Failed);
        assert_eq!(run.meta_json["error"], "upstream timed out");
    }

    #[tokio::test]
    async fn claim_next_moves_to_running() {
        let ledger = MemoryProviderRunsLedger::new();
        let job_id = Uuid::new_v4();
        let key = crate::provider::idempotency_key("svc-music", job_id, "generate", 1);
        ledger
            .create_run(job_id, "svc-music", key, serde_json::json!({}), serde_json::json!({}))
            .await
            .unwrap();

        let claimed = ledger
            .claim_next("svc-music", &[ProviderRunStatus::Queued, ProviderRunStatus::Created])
            .await
            .unwrap()
            .expect("expected a claimable run");
        assert_eq!(claimed.provider_status, ProviderRunStatus::Running);
    }
}
