//! Fusion processor.
//!
//! resolve face input (by artifact id or raw url) -> resolve audio input
//! the same way -> submit the face-video provider call -> poll to
//! completion bounded by the provider deadline -> persist the returned
//! video as an [`crate::artifact::Artifact`] -> upsert a performance row
//! keyed by `(provider, provider_job_id)`. The performance upsert mirrors
//! the Python original's partial-unique-index workaround: the index is
//! only unique `WHERE provider_job_id IS NOT NULL`, so a plain
//! `ON CONFLICT` can't target it portably - the processor inserts first
//! and falls back to an update-by-key on a unique violation instead.

use serde::Deserialize;
use uuid::Uuid;

use crate::artifact::{ttl_for_artifact, ArtifactKind, ArtifactStore, UrlSigner};
use crate::config::{ProviderPolicy, UrlTtlPolicy};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::job::Job;
use crate::provider::client::{FaceVideoProvider, ProviderPoller};
use crate::provider::{idempotency_key, ProviderRunsLedger};
use crate::studios::{output_storage_path, sha256_hex, submit_or_resume, MediaFetcher, MediaUploader, ProcessorOutcome};

#[derive(Debug, Deserialize)]
struct FusionPayload {
    #[serde(default)]
    face_artifact_id: Option<Uuid>,
    #[serde(default)]
    face_url: Option<String>,
    #[serde(default)]
    audio_artifact_id: Option<Uuid>,
    #[serde(default)]
    audio_url: Option<String>,
}

/// Outcome of the insert-first half of the performance upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The partial unique index on `(provider, provider_job_id)` already
    /// has a row for this key - fall back to an update.
    Conflict,
}

/// A fusion job's outcome keyed by `(provider, provider_job_id)` rather
/// than by this crate's own job id, so two different jobs that
/// incidentally reference the same provider run (a retried submit that
/// landed a second ledger row under the old reuse-by-append policy, for
/// instance) converge on one row.
#[async_trait::async_trait]
pub trait FusionPerformanceStore: Send + Sync {
    async fn try_insert(
        &self,
        provider: &str,
        provider_job_id: &str,
        video_url: &str,
        meta: serde_json::Value,
    ) -> OrchestratorResult<InsertOutcome>;

    async fn update_by_provider_job(
        &self,
        provider: &str,
        provider_job_id: &str,
        video_url: &str,
        meta: serde_json::Value,
    ) -> OrchestratorResult<()>;
}

/// Insert-first/update-on-conflict upsert.
pub async fn upsert_performance(
    store: &dyn FusionPerformanceStore,
    provider: &str,
    provider_job_id: &str,
    video_url: &str,
    meta: serde_json::Value,
) -> OrchestratorResult<()> {
    match store.try_insert(provider, provider_job_id, video_url, meta.clone()).await? {
        InsertOutcome::Inserted => Ok(()),
        InsertOutcome::Conflict => store.update_by_provider_job(provider, provider_job_id, video_url, meta).await,
    }
}

async fn resolve_media_url(
    artifacts: &dyn ArtifactStore,
    signer: &dyn UrlSigner,
    url_ttl: &UrlTtlPolicy,
    artifact_id: Option<Uuid>,
    raw_url: Option<&str>,
) -> OrchestratorResult<String> {
    if let Some(url) = raw_url {
        return Ok(url.to_string());
    }
    let artifact_id = artifact_id
        .ok_or_else(|| OrchestratorError::BadRequest("fusion payload missing both artifact id and url".to_string()))?;
    let artifact = artifacts.get(artifact_id).await?;
    let ttl = ttl_for_artifact(artifact.kind, Some(artifact.created_at), chrono::Utc::now(), url_ttl);
    signer.sign_read_url(&artifact.container, &artifact.storage_path, ttl).await
}

#[allow(clippy::too_many_arguments)]
pub async fn process(
    job: &Job,
    ledger: &dyn ProviderRunsLedger,
    artifacts: &dyn ArtifactStore,
    signer: &dyn UrlSigner,
    url_ttl: &UrlTtlPolicy,
    provider: &dyn FaceVideoProvider,
    poller: &dyn ProviderPoller,
    performance: &dyn FusionPerformanceStore,
    fetcher: &dyn MediaFetcher,
    uploader: &dyn MediaUploader,
    provider_policy: &ProviderPolicy,
    container: &str,
    provider_name: &str,
) -> OrchestratorResult<ProcessorOutcome> {
    let payload: FusionPayload = serde_json::from_value(job.payload.clone())
        .map_err(|e| OrchestratorError::BadRequest(format!("invalid fusion payload: {e}")))?;

    let face_url = resolve_media_url(artifacts, signer, url_ttl, payload.face_artifact_id, payload.face_url.as_deref()).await?;
    let audio_url = resolve_media_url(artifacts, signer, url_ttl, payload.audio_artifact_id, payload.audio_url.as_deref()).await?;

    let key = idempotency_key(provider_name, job.id, "animate", 1);
    let run_id = ledger
        .create_run(
            job.id,
            provider_name,
            key,
            serde_json::json!({"face_url": face_url, "audio_url": audio_url}),
            serde_json::json!({}),
        )
        .await?;

    let response = submit_or_resume(ledger, run_id, poller, provider_policy, provider.animate(&face_url, &audio_url)).await?;

    let video_url = response
        .get("video_url")
        .and_then(|v| v.as_str())
        .ok_or_else(|| OrchestratorError::Provider4xx("face-video provider response missing video_url".to_string()))?;
    let run = ledger.get(run_id).await?;
    let provider_job_id = run
        .provider_job_id
        .clone()
        .unwrap_or_else(|| run.idempotency_key.clone());

    let bytes = fetcher.fetch(video_url).await?;
    let sha256 = sha256_hex(&bytes);
    let storage_path = output_storage_path(job.user_id, job.id, "video", "mp4");
    uploader.upload(container, &storage_path, "video/mp4", bytes.clone()).await?;

    artifacts
        .record(
            job.id,
            ArtifactKind::Video,
            container.to_string(),
            storage_path,
            Some(bytes.len() as u64),
            Some("video/mp4".to_string()),
            serde_json::json!({"sha256": sha256}),
        )
        .await?;

    upsert_performance(
        performance,
        provider_name,
        &provider_job_id,
        video_url,
        serde_json::json!({"job_id": job.id}),
    )
    .await?;

    Ok(ProcessorOutcome::Succeeded)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use chrono::Utc;
    use parking_lot::Mutex as PLMutex;

    use super::*;
    use crate::artifact::memory::MemoryArtifactStore;
    use crate::artifact::memory::InMemoryArtifactSigner;
    use crate::job::{Job, JobStatus, StudioType};
    use crate::provider::client::ProviderOutcome;
    use crate::provider::memory::MemoryProviderRunsLedger;

    struct StubFaceVideoProvider;

    #[async_trait::async_trait]
    impl FaceVideoProvider for StubFaceVideoProvider {
        async fn animate(&self, _face_image_url: &str, _audio_url: &str) -> OrchestratorResult<ProviderOutcome> {
            Ok(ProviderOutcome::Complete(serde_json::json!({"video_url": "https://provider.test/out.mp4"})))
        }
    }

    struct StubPoller;

    #[async_trait::async_trait]
    impl ProviderPoller for StubPoller {
        async fn poll(&self, _provider_job_id: &str) -> OrchestratorResult<ProviderOutcome> {
            Ok(ProviderOutcome::Complete(serde_json::json!({"video_url": "https://provider.test/out.mp4"})))
        }
    }

    struct StubFetcher;

    #[async_trait::async_trait]
    impl MediaFetcher for StubFetcher {
        async fn fetch(&self, _url: &str) -> OrchestratorResult<Vec<u8>> {
            Ok(vec![1, 2, 3, 4])
        }
    }

    #[derive(Default)]
    struct StubUploader {
        uploaded: PLMutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl MediaUploader for StubUploader {
        async fn upload(&self, _container: &str, storage_path: &str, _content_type: &str, _bytes: Vec<u8>) -> OrchestratorResult<()> {
            self.uploaded.lock().push(storage_path.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct StubPerformanceStore {
        rows: Mutex<HashMap<(String, String), (String, serde_json::Value)>>,
    }

    #[async_trait::async_trait]
    impl FusionPerformanceStore for StubPerformanceStore {
        async fn try_insert(
            &self,
            provider: &str,
            provider_job_id: &str,
            video_url: &str,
            meta: serde_json::Value,
        ) -> OrchestratorResult<InsertOutcome> {
            let mut rows = self.rows.lock().unwrap();
            let key = (provider.to_string(), provider_job_id.to_string());
            if rows.contains_key(&key) {
                return Ok(InsertOutcome::Conflict);
            }
            rows.insert(key, (video_url.to_string(), meta));
            Ok(InsertOutcome::Inserted)
        }

        async fn update_by_provider_job(
            &self,
            provider: &str,
            provider_job_id: &str,
            video_url: &str,
            meta: serde_json::Value,
        ) -> OrchestratorResult<()> {
            let mut rows = self.rows.lock().unwrap();
            rows.insert((provider.to_string(), provider_job_id.to_string()), (video_url.to_string(), meta));
            Ok(())
        }
    }

    fn test_job(payload: serde_json::Value) -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            studio_type: StudioType::Fusion,
            status: JobStatus::Running,
            user_id: Uuid::new_v4(),
            request_hash: "hash".to_string(),
            payload,
            meta: serde_json::json!({}),
            error_code: None,
            error_message: None,
            attempt_count: 1,
            next_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn fuses_face_and_audio_urls_into_a_video_artifact() {
        let job = test_job(serde_json::json!({
            "face_url": "https://input.test/face.png",
            "audio_url": "https://input.test/audio.mp3",
        }));
        let ledger = MemoryProviderRunsLedger::new();
        let artifacts = MemoryArtifactStore::new();
        let signer = InMemoryArtifactSigner::default();
        let performance = StubPerformanceStore::default();

        let outcome = process(
            &job,
            &ledger,
            &artifacts,
            &signer,
            &UrlTtlPolicy::default(),
            &StubFaceVideoProvider,
            &StubPoller,
            &performance,
            &StubFetcher,
            &StubUploader::default(),
            &ProviderPolicy::default(),
            "video-output",
            "svc-facevideo",
        )
        .await
        .unwrap();

        assert_eq!(outcome, ProcessorOutcome::Succeeded);
        let recorded = artifacts.list_for_job(job.id).await.unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].kind, ArtifactKind::Video);
        assert_eq!(performance.rows.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resolves_face_input_from_an_artifact_id() {
        let artifacts = MemoryArtifactStore::new();
        let ref_job_id = Uuid::new_v4();
        let face_artifact = artifacts
            .record(
                ref_job_id,
                ArtifactKind::FaceImage,
                "face-output".to_string(),
                "u1/face.png".to_string(),
                Some(10),
                Some("image/png".to_string()),
                serde_json::json!({}),
            )
            .await
            .unwrap();

        let job = test_job(serde_json::json!({
            "face_artifact_id": face_artifact.id,
            "audio_url": "https://input.test/audio.mp3",
        }));
        let ledger = MemoryProviderRunsLedger::new();
        let signer = InMemoryArtifactSigner::default();
        let performance = StubPerformanceStore::default();

        let outcome = process(
            &job,
            &ledger,
            &artifacts,
            &signer,
            &UrlTtlPolicy::default(),
            &StubFaceVideoProvider,
            &StubPoller,
            &performance,
            &StubFetcher,
            &StubUploader::default(),
            &ProviderPolicy::default(),
            "video-output",
            "svc-facevideo",
        )
        .await
        .unwrap();

        assert_eq!(outcome, ProcessorOutcome::Succeeded);
    }

    #[tokio::test]
    async fn missing_face_input_is_a_bad_request() {
        let job = test_job(serde_json::json!({"audio_url": "https://input.test/audio.mp3"}));
        let ledger = MemoryProviderRunsLedger::new();
        let artifacts = MemoryArtifactStore::new();
        let signer = InMemoryArtifactSigner::default();
        let performance = StubPerformanceStore::default();

        let err = process(
            &job,
            &ledger,
            &artifacts,
            &signer,
            &UrlTtlPolicy::default(),
            &StubFaceVideoProvider,
            &StubPoller,
            &performance,
            &StubFetcher,
            &StubUploader::default(),
            &ProviderPolicy::default(),
            "video-output",
            "svc-facevideo",
        )
        .await
        .unwrap_err();

        assert_eq!(err.error_code(), "bad_request");
    }

    #[tokio::test]
    async fn upsert_falls_back_to_update_on_conflict() {
        let performance = StubPerformanceStore::default();
        upsert_performance(&performance, "svc-facevideo", "job-1", "https://a", serde_json::json!({})).await.unwrap();
        upsert_performance(&performance, "svc-facevideo", "job-1", "https://b", serde_json::json!({})).await.unwrap();

        let rows = performance.rows.lock().unwrap();
        let (url, _) = rows.get(&("svc-facevideo".to_string(), "job-1".to_string())).unwrap();
        assert_eq!(url, "https://b");
    }
}
