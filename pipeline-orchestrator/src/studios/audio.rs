//! Audio (TTS) processor.
//!
//! compose SSML/parameters -> call TTS provider, idempotent by `(job_id)`
//! only (a single logical step, no per-variant fan-out like face) ->
//! receive bytes -> sha256 -> store -> one [`crate::artifact::Artifact`] row.

use serde::Deserialize;

use crate::artifact::{ArtifactKind, ArtifactStore};
use crate::config::ProviderPolicy;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::job::Job;
use crate::provider::client::{ProviderPoller, TtsProvider};
use crate::provider::{idempotency_key, ProviderRunsLedger};
use crate::studios::{output_storage_path, sha256_hex, submit_or_resume, MediaFetcher, MediaUploader, ProcessorOutcome};

#[derive(Debug, Deserialize)]
struct AudioPayload {
    text: String,
    #[serde(default = "default_voice")]
    voice: String,
}

fn default_voice() -> String {
    "default".to_string()
}

pub async fn process(
    job: &Job,
    ledger: &dyn ProviderRunsLedger,
    artifacts: &dyn ArtifactStore,
    provider: &dyn TtsProvider,
    poller: &dyn ProviderPoller,
    fetcher: &dyn MediaFetcher,
    uploader: &dyn MediaUploader,
    provider_policy: &ProviderPolicy,
    container: &str,
    provider_name: &str,
) -> OrchestratorResult<ProcessorOutcome> {
    let payload: AudioPayload = serde_json::from_value(job.payload.clone())
        .map_err(|e| OrchestratorError::BadRequest(format!("invalid audio payload: {e}")))?;

    let key = idempotency_key(provider_name, job.id, "synthesize", 1);
    let run_id = ledger
        .create_run(
            job.id,
            provider_name,
            key,
            serde_json::json!({"text": payload.text, "voice": payload.voice}),
            serde_json::json!({}),
        )
        .await?;

    let response = submit_or_resume(
        ledger,
        run_id,
        poller,
        provider_policy,
        provider.synthesize(&payload.text, &payload.voice),
    )
    .await?;

    let audio_url = response
        .get("audio_url")
        .and_then(|v| v.as_str())
        .ok_or_else(|| OrchestratorError::Provider4xx("tts provider response missing audio_url".to_string()))?;

    let bytes = fetcher.fetch(audio_url).await?;
    let sha256 = sha256_hex(&bytes);
    let content_type = response
        .get("content_type")
        .and_then(|v| v.as_str())
        .unwrap_or("audio/mpeg")
        .to_string();
    let ext = if content_type.contains("wav") { "wav" } else { "mp3" };
    let storage_path = output_storage_path(job.user_id, job.id, "audio", ext);
    uploader.upload(container, &storage_path, &content_type, bytes.clone()).await?;

    artifacts
        .record(
            job.id,
            ArtifactKind::Audio,
            container.to_string(),
            storage_path,
            Some(bytes.len() as u64),
            Some(content_type),
            serde_json::json!({"sha256": sha256}),
        )
        .await?;

    Ok(ProcessorOutcome::Succeeded)
}
