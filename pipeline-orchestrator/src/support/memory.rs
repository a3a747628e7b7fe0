use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::OrchestratorResult;
use crate::support::{
    compute_event_hash, validate_impersonation, AppendEventRequest, SupportAuditLog, SupportEvent,
};

/// In-memory `SupportAuditLog`. A single mutex over the whole session map
/// stands in for the per-session row/advisory lock a real backend takes -
/// sufficient here since memory-backed appends are already serialized by
/// the lock, never racing across "transactions".
#[derive(Default)]
pub struct MemorySupportAuditLog {
    sessions: Arc<Mutex<HashMap<Uuid, Vec<SupportEvent>>>>,
}

impl MemorySupportAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SupportAuditLog for MemorySupportAuditLog {
    async fn append(&self, req: AppendEventRequest) -> OrchestratorResult<SupportEvent> {
        validate_impersonation(&req)?;

        let mut sessions = self.sessions.lock();
        let events = sessions.entry(req.session_id).or_default();
        let prev_hash = events.last().map(|e| e.event_hash.clone());
        let created_at = Utc::now();
        let event_hash = compute_event_hash(
            req.session_id,
            prev_hash.as_deref(),
            &req.payload,
            req.actor_id,
            req.kind,
            created_at,
        );

        let event = SupportEvent {
            id: Uuid::new_v4(),
            session_id: req.session_id,
            kind: req.kind,
            actor_type: req.actor_type,
            actor_id: req.actor_id,
            impersonated_user_id: req.impersonated_user_id,
            payload: req.payload,
            prev_hash,
            event_hash,
            project_id: req.project_id,
            job_id: req.job_id,
            surface: req.surface,
            created_at,
        };
        events.push(event.clone());
        Ok(event)
    }

    async fn list_session(&self, session_id: Uuid) -> OrchestratorResult<Vec<SupportEvent>> {
        Ok(self
            .sessions
            .lock()
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_by_context(
        &self,
        project_id: Option<Uuid>,
        job_id: Option<Uuid>,
        user_id: Option<Uuid>,
        surface: Option<&str>,
    ) -> OrchestratorResult<Vec<SupportEvent>> {
        let sessions = self.sessions.lock();
        let mut out = Vec::new();
        for events in sessions.values() {
            for e in events {
                if let Some(p) = project_id {
                    if e.project_id != Some(p) {
                        continue;
                    }
                }
                if let Some(j) = job_id {
                    if e.job_id != Some(j) {
                        continue;
                    }
                }
                if let Some(u) = user_id {
                    if e.actor_id != u && e.impersonated_user_id != Some(u) {
                        continue;
                    }
                }
                if let Some(s) = surface {
                    if e.surface.as_deref() != Some(s) {
                        continue;
                    }
                }
                out.push(e.clone());
            }
        }
        out.sort_by_key(|e| e.created_at);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::support::{chain_verify, ActorType, ChainVerifyResult, SupportEventKind};
    use serde_json::json;

    fn req(session: Uuid, payload: serde_json::Value) -> AppendEventRequest {
        AppendEventRequest {
            session_id: session,
            kind: SupportEventKind::Action,
            actor_type: ActorType::User,
            actor_id: Uuid::new_v4(),
            impersonated_user_id: None,
            payload,
            project_id: None,
            job_id: None,
            surface: None,
        }
    }

    #[tokio::test]
    async fn first_event_has_no_prev_hash() {
        let log = MemorySupportAuditLog::new();
        let session = Uuid::new_v4();
        let e = log.append(req(session, json!({"n": 1}))).await.unwrap();
        assert!(e.prev_hash.is_none());
    }

    #[tokio::test]
    async fn chain_verifies_clean() {
        let log = MemorySupportAuditLog::new();
        let session = Uuid::new_v4();
        log.append(req(session, json!({"n": 1}))).await.unwrap();
        log.append(req(session, json!({"n": 2}))).await.unwrap();
        log.append(req(session, json!({"n": 3}))).await.unwrap();
        assert_eq!(chain_verify(&log, session).await.unwrap(), ChainVerifyResult::Ok);
    }

    #[tokio::test]
    async fn tampering_is_detected_downstream() {
        let log = MemorySupportAuditLog::new();
        let session = Uuid::new_v4();
        log.append(req(session, json!({"n": 1}))).await.unwrap();
        let e2 = log.append(req(session, json!({"n": 2}))).await.unwrap();
        log.append(req(session, json!({"n": 3}))).await.unwrap();

        {
            let mut sessions = log.sessions.lock();
            let events = sessions.get_mut(&session).unwrap();
            events[0].payload = json!({"n": 999});
        }

        match chain_verify(&log, session).await.unwrap() {
            ChainVerifyResult::MismatchAt(id) => assert_eq!(id, e2.id),
            ChainVerifyResult::Ok => panic!("expected a mismatch"),
        }
    }
}
