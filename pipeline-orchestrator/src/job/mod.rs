//! Job Store and Claim Engine.
//!
//! This is the studio-domain Job entity: `(user_id, studio_type,
//! request_hash)` idempotent, with the richer status lifecycle
//! (`stitching` included) that the generic `pipeline-queue` job record does
//! not model. Claim follows the exact `SELECT ... FOR UPDATE SKIP LOCKED`
//! pattern already proven in `pipeline_queue::backend::postgres` -
//! generalized here for per-studio partitioning, request-hash idempotent
//! upsert-on-conflict-return-existing-id, and optional stale reclaim.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
mod store;

pub use store::JobStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which studio subsystem owns this job's processing logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudioType {
    Face,
    Audio,
    Fusion,
    Commerce,
    Music,
    Longform,
}

impl StudioType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Face => "face",
            Self::Audio => "audio",
            Self::Fusion => "fusion",
            Self::Commerce => "commerce",
            Self::Music => "music",
            Self::Longform => "longform",
        }
    }

    pub fn all() -> &'static [StudioType] {
        &[
            Self::Face,
            Self::Audio,
            Self::Fusion,
            Self::Commerce,
            Self::Music,
            Self::Longform,
        ]
    }
}

impl std::fmt::Display for StudioType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StudioType {
    type Err = crate::error::OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "face" => Ok(Self::Face),
            "audio" => Ok(Self::Audio),
            "fusion" => Ok(Self::Fusion),
            "commerce" => Ok(Self::Commerce),
            "music" => Ok(Self::Music),
            "longform" => Ok(Self::Longform),
            other => Err(crate::error::OrchestratorError::BadRequest(format!(
                "unknown studio_type {other:?}"
            ))),
        }
    }
}

/// Job lifecycle. Progresses monotonically except for the
/// explicit requeue transition `running -> queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Stitching,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Stitching => "stitching",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = crate::error::OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "stitching" => Ok(Self::Stitching),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            other => Err(crate::error::OrchestratorError::Internal(format!(
                "unknown job status {other:?}"
            ))),
        }
    }
}

/// The unit of scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub studio_type: StudioType,
    pub status: JobStatus,
    pub user_id: Uuid,
    pub request_hash: String,
    pub payload: serde_json::Value,
    pub meta: serde_json::Value,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub attempt_count: u32,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// `required_action` flag used by the music HITL resume path.
    pub fn required_action(&self) -> Option<&str> {
        self.meta.get("required_action").and_then(|v| v.as_str())
    }

    pub fn candidate_group_id(&self) -> Option<&str> {
        self.meta.get("candidate_group_id").and_then(|v| v.as_str())
    }
}

/// Computes the idempotency key for submit: `sha256(user_id || canonical_json(payload))`.
pub fn request_hash(user_id: &Uuid, payload: &serde_json::Value) -> String {
    use sha2::{Digest, Sha256};
    // serde_json::Value serializes object keys in the order they were
    // inserted, which for a `Map` built from parsed JSON is insertion
    // order, not canonical order; sort keys recursively for a stable hash.
    let canonical = canonicalize(payload);
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(canonical.to_string().as_bytes());
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_hash_is_order_independent() {
        let user = Uuid::new_v4();
        let a = json!({"prompt": "hello", "variants": 4});
        let b = json!({"variants": 4, "prompt": "hello"});
        assert_eq!(request_hash(&user, &a), request_hash(&user, &b));
    }

    #[test]
    fn request_hash_is_user_scoped() {
        let payload = json!({"prompt": "hello"});
        let h1 = request_hash(&Uuid::new_v4(), &payload);
        let h2 = request_hash(&Uuid::new_v4(), &payload);
        assert_ne!(h1, h2);
    }
}
