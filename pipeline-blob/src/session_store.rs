use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{BlobError, BlobResult, PartReceipt, UploadId, UploadSession, UploadStatus};
use crate::upload::UploadSessionStore;

/// Default in-process `UploadSessionStore`: a single-process map, good
/// enough for tests and for a single-worker deployment where sessions
/// don't need to survive a restart.
#[derive(Default)]
pub struct MemoryUploadSessionStore {
    sessions: Mutex<HashMap<UploadId, UploadSession>>,
}

impl MemoryUploadSessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl UploadSessionStore for MemoryUploadSessionStore {
    async fn create(&self, session: UploadSession) -> BlobResult<UploadSession> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.insert(session.upload_id.clone(), session.clone());
        Ok(session)
    }

    async fn get(&self, upload_id: &UploadId) -> BlobResult<UploadSession> {
        let sessions = self.sessions.lock().unwrap();
        sessions
            .get(upload_id)
            .cloned()
            .ok_or_else(|| BlobError::upload_not_found(upload_id.as_str()))
    }

    async fn update(&self, session: UploadSession) -> BlobResult<UploadSession> {
        let mut sessions = self.sessions.lock().unwrap();
        if !sessions.contains_key(&session.upload_id) {
            return Err(BlobError::upload_not_found(session.upload_id.as_str()));
        }
        sessions.insert(session.upload_id.clone(), session.clone());
        Ok(session)
    }

    async fn delete(&self, upload_id: &UploadId) -> BlobResult<()> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.remove(upload_id);
        Ok(())
    }

    async fn record_part(&self, upload_id: &UploadId, part: PartReceipt) -> BlobResult<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(upload_id)
            .ok_or_else(|| BlobError::upload_not_found(upload_id.as_str()))?;
        session.progress.received_bytes += part.size_bytes;
        session.progress.parts.insert(part.part_number, part);
        Ok(())
    }

    async fn mark_completed(&self, upload_id: &UploadId, completed_at: i64) -> BlobResult<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(upload_id)
            .ok_or_else(|| BlobError::upload_not_found(upload_id.as_str()))?;
        session.status = UploadStatus::Completed { completed_at };
        session.updated_at = completed_at;
        Ok(())
    }

    async fn mark_failed(&self, upload_id: &UploadId, failed_at: i64, reason: String) -> BlobResult<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(upload_id)
            .ok_or_else(|| BlobError::upload_not_found(upload_id.as_str()))?;
        session.status = UploadStatus::Failed { failed_at, reason };
        session.updated_at = failed_at;
        Ok(())
    }

    async fn mark_aborted(&self, upload_id: &UploadId, aborted_at: i64) -> BlobResult<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(upload_id)
            .ok_or_else(|| BlobError::upload_not_found(upload_id.as_str()))?;
        session.status = UploadStatus::Aborted { aborted_at };
        session.updated_at = aborted_at;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlobId, UploadProgress};

    fn session(upload_id: UploadId) -> UploadSession {
        UploadSession {
            upload_id,
            blob_id: BlobId::new(),
            tenant_id: "tenant-a".to_string(),
            actor_id: None,
            created_at: 0,
            updated_at: 0,
            total_parts: Some(2),
            status: UploadStatus::Active,
            content_type: "video/mp4".to_string(),
            filename: None,
            size_hint: None,
            attributes: serde_json::Value::Null,
            progress: UploadProgress::default(),
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = MemoryUploadSessionStore::new();
        let upload_id = UploadId::new();
        store.create(session(upload_id.clone())).await.unwrap();

        let fetched = store.get(&upload_id).await.unwrap();
        assert_eq!(fetched.upload_id, upload_id);
    }

    #[tokio::test]
    async fn get_missing_session_errors() {
        let store = MemoryUploadSessionStore::new();
        let err = store.get(&UploadId::new()).await.unwrap_err();
        assert!(matches!(err, BlobError::UploadNotFound { .. }));
    }

    #[tokio::test]
    async fn record_part_accumulates_received_bytes() {
        let store = MemoryUploadSessionStore::new();
        let upload_id = UploadId::new();
        store.create(session(upload_id.clone())).await.unwrap();

        store
            .record_part(
                &upload_id,
                PartReceipt {
                    part_number: 1,
                    size_bytes: 1024,
                    etag: Some("etag-1".to_string()),
                    checksum: None,
                    uploaded_at: 0,
                },
            )
            .await
            .unwrap();

        let fetched = store.get(&upload_id).await.unwrap();
        assert_eq!(fetched.progress.received_bytes, 1024);
        assert_eq!(fetched.progress.parts.len(), 1);
    }

    #[tokio::test]
    async fn mark_completed_transitions_status() {
        let store = MemoryUploadSessionStore::new();
        let upload_id = UploadId::new();
        store.create(session(upload_id.clone())).await.unwrap();

        store.mark_completed(&upload_id, 42).await.unwrap();
        let fetched = store.get(&upload_id).await.unwrap();
        assert_eq!(fetched.status, UploadStatus::Completed { completed_at: 42 });
    }
}
