//! MediaAsset: a user-owned reusable input - a voice reference,
//! a face image, a bring-your-own audio track - referenced by a job's
//! `payload` but not owned by any one job. Same shape as [`crate::artifact::Artifact`]
//! plus `user_id` and a `duration_ms` slot that only applies to audio
//! kinds; unlike an `Artifact`, a `MediaAsset`'s lifetime is independent of
//! any job's.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::ArtifactKind;
use crate::error::OrchestratorResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAsset {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: ArtifactKind,
    pub container: String,
    pub storage_path: String,
    pub content_type: Option<String>,
    pub size_bytes: Option<u64>,
    pub sha256: Option<String>,
    /// Only meaningful for `ArtifactKind::Audio` - a face image or video
    /// asset leaves this `None`.
    pub duration_ms: Option<u64>,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait MediaAssetStore: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        user_id: Uuid,
        kind: ArtifactKind,
        container: String,
        storage_path: String,
        content_type: Option<String>,
        size_bytes: Option<u64>,
        sha256: Option<String>,
        duration_ms: Option<u64>,
        meta: serde_json::Value,
    ) -> OrchestratorResult<MediaAsset>;

    async fn get(&self, asset_id: Uuid) -> OrchestratorResult<MediaAsset>;

    async fn list_for_user(&self, user_id: Uuid, kind: Option<ArtifactKind>) -> OrchestratorResult<Vec<MediaAsset>>;

    async fn delete(&self, asset_id: Uuid) -> OrchestratorResult<()>;
}
