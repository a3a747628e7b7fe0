//! Abstract provider client capabilities. Each studio
//! processor depends on the narrowest capability trait it actually calls;
//! concrete HTTP clients live outside this crate and are injected at
//! wiring time, same as `pipeline_blob::BlobStore` is injected into
//! `BlobCoordinator`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::OrchestratorResult;

/// Outcome of a provider call that may still be in flight on the provider's
/// side (e.g. an async generation job) rather than resolved synchronously.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProviderOutcome {
    /// The provider finished synchronously with this response payload.
    Complete(serde_json::Value),
    /// The provider accepted the request and is processing it under
    /// `provider_job_id`; poll with [`ProviderPoller::poll`].
    Pending { provider_job_id: String },
}

#[async_trait]
pub trait TtsProvider: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str) -> OrchestratorResult<ProviderOutcome>;
}

#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn generate(&self, prompt: &str, reference_image_url: Option<&str>) -> OrchestratorResult<ProviderOutcome>;
}

#[async_trait]
pub trait FaceVideoProvider: Send + Sync {
    async fn animate(
        &self,
        face_image_url: &str,
        audio_url: &str,
    ) -> OrchestratorResult<ProviderOutcome>;
}

#[async_trait]
pub trait MusicProvider: Send + Sync {
    async fn generate_candidates(&self, prompt: &str, duration_seconds: u32) -> OrchestratorResult<ProviderOutcome>;
}

#[async_trait]
pub trait ComposeProvider: Send + Sync {
    /// Fuses a face-video segment with an audio/music track into one clip.
    async fn compose(&self, video_url: &str, audio_url: &str) -> OrchestratorResult<ProviderOutcome>;
}

/// Providers that return [`ProviderOutcome::Pending`] are polled through
/// this trait until they settle, bounded by
/// [`crate::config::ProviderPolicy`].
#[async_trait]
pub trait ProviderPoller: Send + Sync {
    async fn poll(&self, provider_job_id: &str) -> OrchestratorResult<ProviderOutcome>;
}
