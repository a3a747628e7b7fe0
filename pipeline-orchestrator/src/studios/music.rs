//! Music processor.
//!
//! Generates a "candidate group" of N provider calls in parallel, each
//! persisted as its own [`crate::artifact::Artifact`] so nothing is lost
//! once a human has something to look at. With HITL enabled the job stops
//! short of a terminal status: it stays `running` with
//! `meta.required_action = "select_candidate"` and `meta.candidate_group_id`
//! set, and [`select_candidate`] is the only way out - clearing the flag so
//! the worker picks the job back up on its next poll rather than requeuing
//! it to `queued`. With HITL disabled a deterministic rule (first
//! candidate) is applied immediately instead.

use serde::Deserialize;
use uuid::Uuid;

use crate::artifact::{ArtifactKind, ArtifactStore};
use crate::config::ProviderPolicy;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::job::{Job, JobStore};
use crate::provider::client::{MusicProvider, ProviderPoller};
use crate::provider::{idempotency_key, ProviderRunsLedger};
use crate::studios::{output_storage_path, sha256_hex, submit_or_resume, MediaFetcher, MediaUploader, ProcessorOutcome};

#[derive(Debug, Deserialize)]
struct MusicPayload {
    prompt: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    lyrics: Option<String>,
    #[serde(default)]
    instrumental: bool,
    #[serde(default)]
    seed: Option<i64>,
    #[serde(default = "default_duration_seconds")]
    duration_seconds: u32,
    #[serde(default = "default_candidate_count")]
    candidate_count: u32,
    #[serde(default)]
    hitl_enabled: bool,
}

fn default_duration_seconds() -> u32 {
    30
}

fn default_candidate_count() -> u32 {
    1
}

#[allow(clippy::too_many_arguments)]
pub async fn process(
    job: &Job,
    jobs: &dyn JobStore,
    ledger: &dyn ProviderRunsLedger,
    artifacts: &dyn ArtifactStore,
    provider: &dyn MusicProvider,
    poller: &dyn ProviderPoller,
    fetcher: &dyn MediaFetcher,
    uploader: &dyn MediaUploader,
    provider_policy: &ProviderPolicy,
    container: &str,
    provider_name: &str,
) -> OrchestratorResult<ProcessorOutcome> {
    if job.required_action() == Some("select_candidate") {
        return Ok(ProcessorOutcome::Blocked);
    }

    if let Some(selected) = job.meta.get("selected_artifact_id").and_then(|v| v.as_str()) {
        let _ = selected;
        return Ok(ProcessorOutcome::Succeeded);
    }

    let payload: MusicPayload = serde_json::from_value(job.payload.clone())
        .map_err(|e| OrchestratorError::BadRequest(format!("invalid music payload: {e}")))?;

    let mut candidates = Vec::with_capacity(payload.candidate_count as usize);
    for candidate_index in 0..payload.candidate_count {
        let key = idempotency_key(provider_name, job.id, "candidate", candidate_index + 1);
        let run_id = ledger
            .create_run(
                job.id,
                provider_name,
                key,
                serde_json::json!({
                    "prompt": payload.prompt,
                    "tags": payload.tags,
                    "lyrics": payload.lyrics,
                    "instrumental": payload.instrumental,
                    "seed": payload.seed,
                    "candidate_index": candidate_index,
                }),
                serde_json::json!({}),
            )
            .await?;

        let response = submit_or_resume(
            ledger,
            run_id,
            poller,
            provider_policy,
            provider.generate_candidates(&payload.prompt, payload.duration_seconds),
        )
        .await?;

        let audio_url = response
            .get("audio_url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| OrchestratorError::Provider4xx("music provider response missing audio_url".to_string()))?;

        let bytes = fetcher.fetch(audio_url).await?;
        let sha256 = sha256_hex(&bytes);
        let storage_path = output_storage_path(job.user_id, job.id, &format!("candidate-{candidate_index}"), "mp3");
        uploader.upload(container, &storage_path, "audio/mpeg", bytes.clone()).await?;

        let artifact = artifacts
            .record(
                job.id,
                ArtifactKind::Music,
                container.to_string(),
                storage_path,
                Some(bytes.len() as u64),
                Some("audio/mpeg".to_string()),
                serde_json::json!({"sha256": sha256, "candidate_index": candidate_index}),
            )
            .await?;

        candidates.push(serde_json::json!({"index": candidate_index, "artifact_id": artifact.id}));
    }

    if payload.hitl_enabled {
        let group_id = Uuid::new_v4();
        jobs.patch_meta(
            job.id,
            serde_json::json!({
                "required_action": "select_candidate",
                "candidate_group_id": group_id,
                "candidates": candidates,
            }),
        )
        .await?;
        return Ok(ProcessorOutcome::Blocked);
    }

    // HITL disabled: deterministic selection rule - always the first
    // candidate.
    let selected = candidates
        .first()
        .and_then(|c| c.get("artifact_id"))
        .cloned()
        .ok_or_else(|| OrchestratorError::Internal("music candidate group produced no candidates".to_string()))?;
    jobs.patch_meta(job.id, serde_json::json!({"selected_artifact_id": selected, "candidates": candidates}))
        .await?;

    Ok(ProcessorOutcome::Succeeded)
}

/// The studio-specific "select a candidate" operation. Clears `required_action` and records the pick; the next
/// worker poll for this job finds `required_action` gone and finalizes
/// instead of generating another candidate group.
pub async fn select_candidate(
    jobs: &dyn JobStore,
    job_id: Uuid,
    candidate_index: u32,
) -> OrchestratorResult<Job> {
    let job = jobs.get(job_id).await?;
    if job.required_action() != Some("select_candidate") {
        return Err(OrchestratorError::BadRequest(
            "job is not awaiting a candidate selection".to_string(),
        ));
    }

    let candidates = job
        .meta
        .get("candidates")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    let chosen = candidates
        .iter()
        .find(|c| c.get("index").and_then(|i| i.as_u64()) == Some(candidate_index as u64))
        .and_then(|c| c.get("artifact_id"))
        .cloned()
        .ok_or_else(|| OrchestratorError::BadRequest(format!("no candidate at index {candidate_index}")))?;

    jobs.patch_meta(
        job_id,
        serde_json::json!({
            "required_action": serde_json::Value::Null,
            "selected_artifact_id": chosen,
            "selected_index": candidate_index,
        }),
    )
    .await
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use parking_lot::Mutex;

    use super::*;
    use crate::artifact::memory::MemoryArtifactStore;
    use crate::job::memory::MemoryJobStore;
    use crate::job::{JobStatus, StudioType};
    use crate::provider::client::ProviderOutcome;
    use crate::provider::memory::MemoryProviderRunsLedger;

    struct StubMusicProvider;

    #[async_trait::async_trait]
    impl MusicProvider for StubMusicProvider {
        async fn generate_candidates(&self, _prompt: &str, _duration_seconds: u32) -> OrchestratorResult<ProviderOutcome> {
            Ok(ProviderOutcome::Complete(serde_json::json!({"audio_url": "https://provider.test/candidate.mp3"})))
        }
    }

    struct StubPoller;

    #[async_trait::async_trait]
    impl ProviderPoller for StubPoller {
        async fn poll(&self, _provider_job_id: &str) -> OrchestratorResult<ProviderOutcome> {
            Ok(ProviderOutcome::Complete(serde_json::json!({"audio_url": "https://provider.test/candidate.mp3"})))
        }
    }

    struct StubFetcher;

    #[async_trait::async_trait]
    impl MediaFetcher for StubFetcher {
        async fn fetch(&self, _url: &str) -> OrchestratorResult<Vec<u8>> {
            Ok(vec![9, 9, 9])
        }
    }

    #[derive(Default)]
    struct StubUploader {
        uploaded: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl MediaUploader for StubUploader {
        async fn upload(&self, _container: &str, storage_path: &str, _content_type: &str, _bytes: Vec<u8>) -> OrchestratorResult<()> {
            self.uploaded.lock().push(storage_path.to_string());
            Ok(())
        }
    }

    async fn submit_music_job(jobs: &MemoryJobStore, payload: serde_json::Value) -> Job {
        let user = Uuid::new_v4();
        let hash = crate::job::request_hash(&user, &payload);
        jobs.submit(user, StudioType::Music, hash, payload, serde_json::json!({}))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn hitl_disabled_selects_first_candidate_and_succeeds() {
        let jobs = MemoryJobStore::new();
        let ledger = MemoryProviderRunsLedger::new();
        let artifacts = MemoryArtifactStore::new();
        let job = submit_music_job(
            &jobs,
            serde_json::json!({"prompt": "lofi beat", "candidate_count": 2, "hitl_enabled": false}),
        )
        .await;

        let outcome = process(
            &job,
            &jobs,
            &ledger,
            &artifacts,
            &StubMusicProvider,
            &StubPoller,
            &StubFetcher,
            &StubUploader::default(),
            &ProviderPolicy::default(),
            "music-output",
            "svc-music",
        )
        .await
        .unwrap();

        assert_eq!(outcome, ProcessorOutcome::Succeeded);
        let reloaded = jobs.get(job.id).await.unwrap();
        assert!(reloaded.meta.get("selected_artifact_id").is_some());
        assert_eq!(artifacts.list_for_job(job.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn hitl_enabled_blocks_until_candidate_is_selected() {
        let jobs = MemoryJobStore::new();
        let ledger = MemoryProviderRunsLedger::new();
        let artifacts = MemoryArtifactStore::new();
        let job = submit_music_job(
            &jobs,
            serde_json::json!({"prompt": "lofi beat", "candidate_count": 2, "hitl_enabled": true}),
        )
        .await;

        let outcome = process(
            &job,
            &jobs,
            &ledger,
            &artifacts,
            &StubMusicProvider,
            &StubPoller,
            &StubFetcher,
            &StubUploader::default(),
            &ProviderPolicy::default(),
            "music-output",
            "svc-music",
        )
        .await
        .unwrap();
        assert_eq!(outcome, ProcessorOutcome::Blocked);

        let blocked_job = jobs.get(job.id).await.unwrap();
        assert_eq!(blocked_job.required_action(), Some("select_candidate"));
        assert_eq!(blocked_job.status, JobStatus::Running);

        // A second poll while still blocked does not regenerate candidates.
        let outcome_again = process(
            &blocked_job,
            &jobs,
            &ledger,
            &artifacts,
            &StubMusicProvider,
            &StubPoller,
            &StubFetcher,
            &StubUploader::default(),
            &ProviderPolicy::default(),
            "music-output",
            "svc-music",
        )
        .await
        .unwrap();
        assert_eq!(outcome_again, ProcessorOutcome::Blocked);
        assert_eq!(artifacts.list_for_job(job.id).await.unwrap().len(), 2);

        select_candidate(&jobs, job.id, 1).await.unwrap();
        let resumed_job = jobs.get(job.id).await.unwrap();
        assert_eq!(resumed_job.required_action(), None);

        let final_outcome = process(
            &resumed_job,
            &jobs,
            &ledger,
            &artifacts,
            &StubMusicProvider,
            &StubPoller,
            &StubFetcher,
            &StubUploader::default(),
            &ProviderPolicy::default(),
            "music-output",
            "svc-music",
        )
        .await
        .unwrap();
        assert_eq!(final_outcome, ProcessorOutcome::Succeeded);
    }

    #[tokio::test]
    async fn select_candidate_rejects_when_not_awaiting_selection() {
        let jobs = MemoryJobStore::new();
        let job = submit_music_job(&jobs, serde_json::json!({"prompt": "x"})).await;
        let err = select_candidate(&jobs, job.id, 0).await.unwrap_err();
        assert_eq!(err.error_code(), "bad_request");
    }

    #[tokio::test]
    async fn select_candidate_rejects_unknown_index() {
        let jobs = MemoryJobStore::new();
        let job = submit_music_job(&jobs, serde_json::json!({"prompt": "x"})).await;
        jobs.patch_meta(
            job.id,
            serde_json::json!({"required_action": "select_candidate", "candidates": [{"index": 0, "artifact_id": Uuid::new_v4()}]}),
        )
        .await
        .unwrap();

        let err = select_candidate(&jobs, job.id, 5).await.unwrap_err();
        assert_eq!(err.error_code(), "bad_request");
    }
}
