//! Provider Runs Ledger.
//!
//! Every call out to a third-party provider (TTS, image, face video, music,
//! compose) is logged as one row keyed by a deterministic idempotency key
//! `"{provider}:{job_id}:{logical_step}:{attempt}"`. Retries of the same
//! logical step and attempt update the row in place rather than appending -
//! grounded on `provider_runs_service.py`'s `create_run` (`ON CONFLICT
//! (idempotency_key) DO UPDATE`) and `finish` (dynamic patch-style update).

pub mod client;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::OrchestratorResult;

/// Provider-call lifecycle as tracked in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderRunStatus {
    Created,
    Queued,
    Submitted,
    Running,
    Succeeded,
    Failed,
}

impl ProviderRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Queued => "queued",
            Self::Submitted => "submitted",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ProviderRunStatus {
    type Err = crate::error::OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "queued" => Ok(Self::Queued),
            "submitted" => Ok(Self::Submitted),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(crate::error::OrchestratorError::Internal(format!(
                "unknown provider run status {other:?}"
            ))),
        }
    }
}

/// One row in the ledger: a single attempt at a single logical step of a
/// single job's provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRun {
    pub id: Uuid,
    pub job_id: Uuid,
    pub provider: String,
    pub logical_step: String,
    pub attempt: u32,
    pub idempotency_key: String,
    pub provider_status: ProviderRunStatus,
    pub provider_job_id: Option<String>,
    pub request_json: serde_json::Value,
    pub response_json: Option<serde_json::Value>,
    pub meta_json: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `"{provider}:{job_id}:{logical_step}:{attempt}"` - a pure function of its
/// inputs so a crashed worker can recompute the same key on resume and land
/// on the same ledger row instead of creating a duplicate.
pub fn idempotency_key(provider: &str, job_id: Uuid, logical_step: &str, attempt: u32) -> String {
    format!("{provider}:{job_id}:{logical_step}:{attempt}")
}

/// Fields accepted by [`ProviderRunsLedger::finish`]. Mirrors
/// `provider_runs_service.py`'s dynamic patch: only the fields present are
/// updated, and an `error` folds into `meta_json` rather than requiring a
/// schema column.
#[derive(Debug, Clone, Default)]
pub struct FinishPatch {
    pub provider_status: ProviderRunStatus,
    pub provider_job_id: Option<String>,
    pub response_json: Option<serde_json::Value>,
    pub meta_patch: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl FinishPatch {
    pub fn succeeded(response_json: serde_json::Value) -> Self {
        Self {
            provider_status: ProviderRunStatus::Succeeded,
            response_json: Some(response_json),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            provider_status: ProviderRunStatus::Failed,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

impl Default for ProviderRunStatus {
    fn default() -> Self {
        Self::Created
    }
}

#[async_trait::async_trait]
pub trait ProviderRunsLedger: Send + Sync {
    /// Idempotent create: a repeat call with the same `idempotency_key`
    /// updates `updated_at` on the existing row and returns its id rather
    /// than inserting a duplicate.
    async fn create_run(
        &self,
        job_id: Uuid,
        provider: &str,
        idempotency_key: String,
        request_json: serde_json::Value,
        meta_json: serde_json::Value,
    ) -> OrchestratorResult<Uuid>;

    /// Claims the oldest run in one of `statuses` for `provider`, same
    /// `SELECT ... FOR UPDATE SKIP LOCKED` shape as the job claim engine.
    async fn claim_next(
        &self,
        provider: &str,
        statuses: &[ProviderRunStatus],
    ) -> OrchestratorResult<Option<ProviderRun>>;

    async fn finish(&self, run_id: Uuid, patch: FinishPatch) -> OrchestratorResult<()>;

    async fn get(&self, run_id: Uuid) -> OrchestratorResult<ProviderRun>;

    async fn list_for_job(&self, job_id: Uuid) -> OrchestratorResult<Vec<ProviderRun>>;
}
