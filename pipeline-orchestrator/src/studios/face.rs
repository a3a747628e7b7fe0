//! Face processor.
//!
//! validate -> safety filter on text -> translate to English if needed ->
//! compose prompt variants -> per-variant image provider call, idempotent
//! by `(job_id, variant_index)` -> download bytes -> upload to blob
//! storage -> one [`crate::artifact::Artifact`] row per variant.

use serde::Deserialize;

use crate::artifact::{ArtifactKind, ArtifactStore};
use crate::config::{ProviderPolicy, SafetySettings};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::job::Job;
use crate::provider::client::{ImageProvider, ProviderPoller};
use crate::provider::{idempotency_key, ProviderRunsLedger};
use crate::studios::{output_storage_path, sha256_hex, submit_or_resume, MediaFetcher, MediaUploader, ProcessorOutcome};

#[derive(Debug, Deserialize)]
struct FacePayload {
    prompt: String,
    #[serde(default)]
    negative_prompt: Option<String>,
    #[serde(default)]
    reference_image_url: Option<String>,
    #[serde(default = "default_variants")]
    variants: u32,
    #[serde(default)]
    locale: Option<String>,
}

fn default_variants() -> u32 {
    1
}

/// Blocked-keyword safety filter; a
/// case-insensitive substring match over free text run before any
/// provider call touches a prompt.
pub fn check_prompt_safety(text: &str, safety: &SafetySettings) -> OrchestratorResult<()> {
    let lower = text.to_lowercase();
    for kw in &safety.blocked_keywords {
        if !kw.is_empty() && lower.contains(&kw.to_lowercase()) {
            return Err(OrchestratorError::UnsafePrompt(format!("blocked keyword matched: {kw}")));
        }
    }
    Ok(())
}

fn needs_translation(locale: Option<&str>) -> bool {
    match locale {
        None => false,
        Some(l) => !l.eq_ignore_ascii_case("en") && !l.to_lowercase().starts_with("en-"),
    }
}

/// English-translation hop. An external collaborator this crate only
/// calls through a trait object; prompt-engineering heuristics live
/// elsewhere.
#[async_trait::async_trait]
pub trait TranslationProvider: Send + Sync {
    async fn translate_to_english(&self, text: &str, source_locale: &str) -> OrchestratorResult<String>;
}

#[allow(clippy::too_many_arguments)]
pub async fn process(
    job: &Job,
    ledger: &dyn ProviderRunsLedger,
    artifacts: &dyn ArtifactStore,
    provider: &dyn ImageProvider,
    poller: &dyn ProviderPoller,
    translator: &dyn TranslationProvider,
    fetcher: &dyn MediaFetcher,
    uploader: &dyn MediaUploader,
    safety: &SafetySettings,
    provider_policy: &ProviderPolicy,
    container: &str,
    provider_name: &str,
) -> OrchestratorResult<ProcessorOutcome> {
    let payload: FacePayload = serde_json::from_value(job.payload.clone())
        .map_err(|e| OrchestratorError::BadRequest(format!("invalid face payload: {e}")))?;

    check_prompt_safety(&payload.prompt, safety)?;
    if let Some(np) = &payload.negative_prompt {
        check_prompt_safety(np, safety)?;
    }

    let prompt = if needs_translation(payload.locale.as_deref()) {
        translator
            .translate_to_english(&payload.prompt, payload.locale.as_deref().unwrap_or(""))
            .await?
    } else {
        payload.prompt.clone()
    };

    for variant_index in 0..payload.variants {
        let key = idempotency_key(provider_name, job.id, "image", variant_index + 1);
        let run_id = ledger
            .create_run(
                job.id,
                provider_name,
                key,
                serde_json::json!({"prompt": prompt, "variant_index": variant_index}),
                serde_json::json!({}),
            )
            .await?;

        let reference = payload.reference_image_url.as_deref();
        let response = submit_or_resume(ledger, run_id, poller, provider_policy, provider.generate(&prompt, reference)).await?;

        let image_url = response
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| OrchestratorError::Provider4xx("image provider response missing url".to_string()))?;

        let bytes = fetcher.fetch(image_url).await?;
        let sha256 = sha256_hex(&bytes);
        let storage_path = output_storage_path(job.user_id, job.id, &format!("variant-{variant_index}"), "png");
        uploader.upload(container, &storage_path, "image/png", bytes.clone()).await?;

        artifacts
            .record(
                job.id,
                ArtifactKind::FaceImage,
                container.to_string(),
                storage_path,
                Some(bytes.len() as u64),
                Some("image/png".to_string()),
                serde_json::json!({"sha256": sha256, "variant_index": variant_index}),
            )
            .await?;
    }

    Ok(ProcessorOutcome::Succeeded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_keyword_rejects() {
        let safety = SafetySettings {
            blocked_keywords: vec!["forbidden".to_string()],
        };
        assert!(check_prompt_safety("a Forbidden scene", &safety).is_err());
    }

    #[test]
    fn clean_prompt_passes() {
        let safety = SafetySettings {
            blocked_keywords: vec!["forbidden".to_string()],
        };
        assert!(check_prompt_safety("a sunny beach", &safety).is_ok());
    }

    #[test]
    fn english_locale_skips_translation() {
        assert!(!needs_translation(Some("en")));
        assert!(!needs_translation(Some("en-US")));
        assert!(!needs_translation(None));
    }

    #[test]
    fn non_english_locale_needs_translation() {
        assert!(needs_translation(Some("fr")));
        assert!(needs_translation(Some("ja-JP")));
    }
}
