use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::artifact::{Artifact, ArtifactKind, ArtifactStore, UrlSigner};

pub struct MemoryArtifactStore {
    artifacts: Arc<RwLock<HashMap<Uuid, Artifact>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self {
            artifacts: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn record(
        &self,
        job_id: Uuid,
        kind: ArtifactKind,
        container: String,
        storage_path: String,
        size_bytes: Option<u64>,
        content_type: Option<String>,
        meta: serde_json::Value,
    ) -> OrchestratorResult<Artifact> {
        let artifact = Artifact {
            id: Uuid::new_v4(),
            job_id,
            kind,
            container,
            storage_path,
            size_bytes,
            content_type,
            meta,
            created_at: Utc::now(),
        };
        self.artifacts.write().insert(artifact.id, artifact.clone());
        Ok(artifact)
    }

    async fn get(&self, artifact_id: Uuid) -> OrchestratorResult<Artifact> {
        self.artifacts
            .read()
            .get(&artifact_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::Internal(format!("artifact {artifact_id} not found")))
    }

    async fn list_for_job(&self, job_id: Uuid) -> OrchestratorResult<Vec<Artifact>> {
        Ok(self
            .artifacts
            .read()
            .values()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect())
    }
}

/// Wraps any [`pipeline_blob::SignedUrlBlobStore`] as a [`UrlSigner`],
/// qualifying the blob key with the container the way
/// `AzureBlobSasSigner.sign_read_url` qualifies `storage_path` with its
/// `container_name` argument.
pub struct BlobStoreUrlSigner<S> {
    store: S,
}

impl<S> BlobStoreUrlSigner<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S> UrlSigner for BlobStoreUrlSigner<S>
where
    S: pipeline_blob::SignedUrlBlobStore,
{
    async fn sign_read_url(
        &self,
        container: &str,
        storage_path: &str,
        ttl: std::time::Duration,
    ) -> OrchestratorResult<String> {
        let key = format!("{container}/{}", storage_path.trim_start_matches('/'));
        self.store
            .sign_get(&key, ttl.as_secs())
            .await
            .map_err(OrchestratorError::from)
    }
}

/// Deterministic, non-cryptographic [`UrlSigner`] for tests - just appends
/// the TTL so assertions can see it took effect without a real blob store.
#[derive(Default)]
pub struct InMemoryArtifactSigner;

#[async_trait]
impl UrlSigner for InMemoryArtifactSigner {
    async fn sign_read_url(
        &self,
        container: &str,
        storage_path: &str,
        ttl: std::time::Duration,
    ) -> OrchestratorResult<String> {
        Ok(format!("https://blob.test/{container}/{storage_path}?ttl={}", ttl.as_secs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_and_list_round_trip() {
        let store = MemoryArtifactStore::new();
        let job_id = Uuid::new_v4();
        store
            .record(
                job_id,
                ArtifactKind::FaceImage,
                "face-output".into(),
                "users/abc/img1.png".into(),
                Some(1024),
                Some("image/png".into()),
                serde_json::json!({}),
            )
            .await
            .unwrap();

        let listed = store.list_for_job(job_id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].storage_path, "users/abc/img1.png");
    }
}
