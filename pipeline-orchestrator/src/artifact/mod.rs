//! Artifact Store and SAS/URL Signer.
//!
//! An artifact's identity is its content-addressed `storage_path` inside a
//! studio-specific container - a stable key that outlives any URL minted
//! against it. A signed URL is a time-limited read grant layered on top,
//! whose TTL depends on the artifact's kind and age: face images get a
//! short TTL, "recent" videos (within [`crate::config::UrlTtlPolicy`]'s
//! `recent_window`) get a long one, older videos get a short one. This
//! mirrors `blob_sas_service.py`'s `AzureBlobSasSigner.sign_read_url` and
//! `dashboard_service.py`'s `_enrich_carousels_with_sas` TTL selection,
//! adapted to `pipeline_blob`'s `BlobStore`/`SignedUrlBlobStore` traits
//! instead of a bespoke Azure SAS call.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::OrchestratorResult;

/// What kind of media this artifact is - drives both the storage container
/// and the TTL policy applied when signing a read URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    FaceImage,
    Audio,
    Video,
    Music,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FaceImage => "face_image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Music => "music",
        }
    }
}

impl std::str::FromStr for ArtifactKind {
    type Err = crate::error::OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "face_image" => Ok(Self::FaceImage),
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            "music" => Ok(Self::Music),
            other => Err(crate::error::OrchestratorError::Internal(format!(
                "unknown artifact kind {other:?}"
            ))),
        }
    }
}

/// A produced media asset, addressed by a stable `(container, storage_path)`
/// pair. URLs are derived, never stored - re-signing is how a TTL rotates
/// without a write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub job_id: Uuid,
    pub kind: ArtifactKind,
    pub container: String,
    pub storage_path: String,
    pub size_bytes: Option<u64>,
    pub content_type: Option<String>,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn record(
        &self,
        job_id: Uuid,
        kind: ArtifactKind,
        container: String,
        storage_path: String,
        size_bytes: Option<u64>,
        content_type: Option<String>,
        meta: serde_json::Value,
    ) -> OrchestratorResult<Artifact>;

    async fn get(&self, artifact_id: Uuid) -> OrchestratorResult<Artifact>;

    async fn list_for_job(&self, job_id: Uuid) -> OrchestratorResult<Vec<Artifact>>;
}

/// Mints read-only, time-limited URLs for an artifact's content - the Rust
/// analogue of `AzureBlobSasSigner.sign_read_url`, expressed against
/// [`pipeline_blob::BlobStore`] so any backend (filesystem, S3, Azure) can
/// serve it without this crate depending on a cloud SDK directly.
#[async_trait::async_trait]
pub trait UrlSigner: Send + Sync {
    async fn sign_read_url(
        &self,
        container: &str,
        storage_path: &str,
        ttl: std::time::Duration,
    ) -> OrchestratorResult<String>;
}

/// Picks the TTL for an artifact: face images always get the
/// short TTL; video gets the long TTL if `created_at` falls within
/// `recent_window` of `now`, else the short default. An artifact with no
/// resolvable age is treated as recent - `dashboard_service.py`'s
/// `_is_recent` fails open the same way so a dashboard link never goes
/// stale just because a timestamp failed to parse.
pub fn ttl_for_artifact(
    kind: ArtifactKind,
    created_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    policy: &crate::config::UrlTtlPolicy,
) -> std::time::Duration {
    match kind {
        ArtifactKind::FaceImage => policy.face_image,
        ArtifactKind::Audio | ArtifactKind::Music => policy.default_video,
        ArtifactKind::Video => {
            let recent = match created_at {
                None => true,
                Some(t) => {
                    let window = chrono::Duration::from_std(policy.recent_window).unwrap_or_default();
                    now.signed_duration_since(t) <= window
                }
            };
            if recent {
                policy.recent_video
            } else {
                policy.default_video
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UrlTtlPolicy;

    #[test]
    fn face_image_always_gets_short_ttl() {
        let policy = UrlTtlPolicy::default();
        let ttl = ttl_for_artifact(ArtifactKind::FaceImage, None, Utc::now(), &policy);
        assert_eq!(ttl, policy.face_image);
    }

    #[test]
    fn recent_video_gets_long_ttl() {
        let policy = UrlTtlPolicy::default();
        let now = Utc::now();
        let created_at = now - chrono::Duration::days(1);
        let ttl = ttl_for_artifact(ArtifactKind::Video, Some(created_at), now, &policy);
        assert_eq!(ttl, policy.recent_video);
    }

    #[test]
    fn old_video_gets_default_ttl() {
        let policy = UrlTtlPolicy::default();
        let now = Utc::now();
        let created_at = now - chrono::Duration::days(30);
        let ttl = ttl_for_artifact(ArtifactKind::Video, Some(created_at), now, &policy);
        assert_eq!(ttl, policy.default_video);
    }

    #[test]
    fn unparsable_age_fails_open_to_recent() {
        let policy = UrlTtlPolicy::default();
        let ttl = ttl_for_artifact(ArtifactKind::Video, None, Utc::now(), &policy);
        assert_eq!(ttl, policy.recent_video);
    }
}
