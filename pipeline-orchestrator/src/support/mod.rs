//! Support Audit Log.
//!
//! An append-only, hash-chained event stream per session. Each event's
//! `event_hash` commits to the previous event's hash, its own payload, and
//! its actor/kind/timestamp, so a `chain_verify` pass can detect tampering
//! with any single row without a separate signature store. Grounded on
//! `support_audit.py`'s `append_event`/`chain_verify` pair - the admin-
//! impersonation invariant (admin events must carry `impersonated_user_id`)
//! is asserted here rather than left to a DB constraint, since the legacy
//! column is non-nullable and a constraint violation would surface as a
//! raw DB error instead of a typed one.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{OrchestratorError, OrchestratorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportEventKind {
    Snapshot,
    Action,
    UserMessage,
    AssistantMessage,
    System,
}

impl SupportEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Action => "action",
            Self::UserMessage => "user_message",
            Self::AssistantMessage => "assistant_message",
            Self::System => "system",
        }
    }
}

impl std::str::FromStr for SupportEventKind {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "snapshot" => Ok(Self::Snapshot),
            "action" => Ok(Self::Action),
            "user_message" => Ok(Self::UserMessage),
            "assistant_message" => Ok(Self::AssistantMessage),
            "system" => Ok(Self::System),
            other => Err(OrchestratorError::Internal(format!(
                "unknown support event kind {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    User,
    Admin,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl std::str::FromStr for ActorType {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            other => Err(OrchestratorError::Internal(format!("unknown actor type {other:?}"))),
        }
    }
}

/// A single row in a session's hash chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportEvent {
    pub id: Uuid,
    pub session_id: Uuid,
    pub kind: SupportEventKind,
    pub actor_type: ActorType,
    pub actor_id: Uuid,
    /// Required (and asserted) when `actor_type == Admin`: the legacy
    /// non-nullable `impersonated_user_id` column this event was recorded
    /// under the identity of.
    pub impersonated_user_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub prev_hash: Option<String>,
    pub event_hash: String,
    /// Flattened context used by the `(project_id, job_id, user_id,
    /// surface)` query view.
    pub project_id: Option<Uuid>,
    pub job_id: Option<Uuid>,
    pub surface: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// `H(session_id ‖ prev_hash ‖ canonical(payload) ‖ actor ‖ kind ‖ created_at)`.
/// Canonicalizes `payload` the same way `job::request_hash` canonicalizes a
/// submit payload (recursively sorted object keys) so the hash is stable
/// regardless of how the caller built the JSON.
pub fn compute_event_hash(
    session_id: Uuid,
    prev_hash: Option<&str>,
    payload: &serde_json::Value,
    actor_id: Uuid,
    kind: SupportEventKind,
    created_at: DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update(prev_hash.unwrap_or("").as_bytes());
    hasher.update(canonicalize(payload).to_string().as_bytes());
    hasher.update(actor_id.as_bytes());
    hasher.update(kind.as_str().as_bytes());
    hasher.update(created_at.to_rfc3339().as_bytes());
    hex::encode(hasher.finalize())
}

fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for k in keys {
                sorted.insert(k.clone(), canonicalize(&map[k]));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

/// Request to append one event. `impersonated_user_id` is validated by
/// [`SupportAuditLog::append`] before insert: required iff `actor_type ==
/// Admin`.
#[derive(Debug, Clone)]
pub struct AppendEventRequest {
    pub session_id: Uuid,
    pub kind: SupportEventKind,
    pub actor_type: ActorType,
    pub actor_id: Uuid,
    pub impersonated_user_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub project_id: Option<Uuid>,
    pub job_id: Option<Uuid>,
    pub surface: Option<String>,
}

/// Result of [`chain_verify`]: either the chain is intact, or the first
/// event whose recomputed hash disagrees with the stored one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainVerifyResult {
    Ok,
    MismatchAt(Uuid),
}

#[async_trait::async_trait]
pub trait SupportAuditLog: Send + Sync {
    /// Appends one event under a per-session serialization point (an
    /// advisory or row lock on the session in a real backend), so
    /// `prev_hash` is always read-then-written atomically with respect to
    /// other appenders on the same session.
    async fn append(&self, req: AppendEventRequest) -> OrchestratorResult<SupportEvent>;

    async fn list_session(&self, session_id: Uuid) -> OrchestratorResult<Vec<SupportEvent>>;

    async fn list_by_context(
        &self,
        project_id: Option<Uuid>,
        job_id: Option<Uuid>,
        user_id: Option<Uuid>,
        surface: Option<&str>,
    ) -> OrchestratorResult<Vec<SupportEvent>>;
}

/// Walks a session's events in `created_at` order, recomputing each hash
/// and comparing. Implemented generically over [`SupportAuditLog::list_session`]
/// rather than per-backend so every implementation gets the exact same
/// verification semantics.
pub async fn chain_verify(
    log: &dyn SupportAuditLog,
    session_id: Uuid,
) -> OrchestratorResult<ChainVerifyResult> {
    let events = log.list_session(session_id).await?;
    let mut prev: Option<&str> = None;
    for event in &events {
        if event.prev_hash.as_deref() != prev {
            return Ok(ChainVerifyResult::MismatchAt(event.id));
        }
        let recomputed = compute_event_hash(
            event.session_id,
            event.prev_hash.as_deref(),
            &event.payload,
            event.actor_id,
            event.kind,
            event.created_at,
        );
        if recomputed != event.event_hash {
            return Ok(ChainVerifyResult::MismatchAt(event.id));
        }
        prev = Some(event.event_hash.as_str());
    }
    Ok(ChainVerifyResult::Ok)
}

/// Validates the admin-impersonation invariant before an append is built
///: admin-authored events must carry
/// `impersonated_user_id` because the legacy column is non-nullable.
pub fn validate_impersonation(req: &AppendEventRequest) -> OrchestratorResult<()> {
    if req.actor_type == ActorType::Admin && req.impersonated_user_id.is_none() {
        return Err(OrchestratorError::BadRequest(
            "admin support event requires impersonated_user_id".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_is_order_independent_over_payload_keys() {
        let session = Uuid::new_v4();
        let actor = Uuid::new_v4();
        let now = Utc::now();
        let a = json!({"a": 1, "b": 2});
        let b = json!({"b": 2, "a": 1});
        let h1 = compute_event_hash(session, None, &a, actor, SupportEventKind::Action, now);
        let h2 = compute_event_hash(session, None, &b, actor, SupportEventKind::Action, now);
        assert_eq!(h1, h2);
    }

    #[test]
    fn admin_without_impersonation_is_rejected() {
        let req = AppendEventRequest {
            session_id: Uuid::new_v4(),
            kind: SupportEventKind::Action,
            actor_type: ActorType::Admin,
            actor_id: Uuid::new_v4(),
            impersonated_user_id: None,
            payload: json!({}),
            project_id: None,
            job_id: None,
            surface: None,
        };
        assert!(validate_impersonation(&req).is_err());
    }

    #[test]
    fn admin_with_impersonation_is_accepted() {
        let req = AppendEventRequest {
            session_id: Uuid::new_v4(),
            kind: SupportEventKind::Action,
            actor_type: ActorType::Admin,
            actor_id: Uuid::new_v4(),
            impersonated_user_id: Some(Uuid::new_v4()),
            payload: json!({}),
            project_id: None,
            job_id: None,
            surface: None,
        };
        assert!(validate_impersonation(&req).is_ok());
    }

    #[test]
    fn user_events_never_need_impersonation() {
        let req = AppendEventRequest {
            session_id: Uuid::new_v4(),
            kind: SupportEventKind::UserMessage,
            actor_type: ActorType::User,
            actor_id: Uuid::new_v4(),
            impersonated_user_id: None,
            payload: json!({"text": "hi"}),
            project_id: None,
            job_id: None,
            surface: None,
        };
        assert!(validate_impersonation(&req).is_ok());
    }
}
