use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::artifact::ArtifactKind;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::media_asset::{MediaAsset, MediaAssetStore};

#[derive(Default)]
pub struct MemoryMediaAssetStore {
    assets: Arc<RwLock<HashMap<Uuid, MediaAsset>>>,
}

impl MemoryMediaAssetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MediaAssetStore for MemoryMediaAssetStore {
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
    ) -> OrchestratorResult<MediaAsset> {
        let asset = MediaAsset {
            id: Uuid::new_v4(),
            user_id,
            kind,
            container,
            storage_path,
            content_type,
            size_bytes,
            sha256,
            duration_ms,
            meta,
            created_at: Utc::now(),
        };
        self.assets.write().insert(asset.id, asset.clone());
        Ok(asset)
    }

    async fn get(&self, asset_id: Uuid) -> OrchestratorResult<MediaAsset> {
        self.assets
            .read()
            .get(&asset_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::Internal(format!("media asset {asset_id} not found")))
    }

    async fn list_for_user(&self, user_id: Uuid, kind: Option<ArtifactKind>) -> OrchestratorResult<Vec<MediaAsset>> {
        Ok(self
            .assets
            .read()
            .values()
            .filter(|a| a.user_id == user_id && kind.map(|k| k == a.kind).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn delete(&self, asset_id: Uuid) -> OrchestratorResult<()> {
        self.assets.write().remove(&asset_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_for_user_filters_by_kind() {
        let store = MemoryMediaAssetStore::new();
        let user = Uuid::new_v4();
        store
            .record(
                user,
                ArtifactKind::Audio,
                "audio-output".into(),
                "u/voice1.wav".into(),
                Some("audio/wav".into()),
                Some(2048),
                None,
                Some(4200),
                serde_json::json!({}),
            )
            .await
            .unwrap();
        store
            .record(
                user,
                ArtifactKind::FaceImage,
                "face-output".into(),
                "u/face1.png".into(),
                Some("image/png".into()),
                Some(1024),
                None,
                None,
                serde_json::json!({}),
            )
            .await
            .unwrap();

        let audio_only = store.list_for_user(user, Some(ArtifactKind::Audio)).await.unwrap();
        assert_eq!(audio_only.len(), 1);
        assert_eq!(audio_only[0].duration_ms, Some(4200));

        let all = store.list_for_user(user, None).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn delete_removes_asset() {
        let store = MemoryMediaAssetStore::new();
        let user = Uuid::new_v4();
        let asset = store
            .record(
                user,
                ArtifactKind::FaceImage,
                "face-output".into(),
                "u/face1.png".into(),
                None,
                None,
                None,
                None,
                serde_json::json!({}),
            )
            .await
            .unwrap();
        store.delete(asset.id).await.unwrap();
        assert!(store.get(asset.id).await.is_err());
    }
}
