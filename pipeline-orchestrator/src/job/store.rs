use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::OrchestratorResult;
use crate::job::{Job, StudioType};

/// Job Store + Claim Engine contract.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Idempotent submit: returns the existing job if `(user_id,
    /// studio_type, request_hash)` already has a row, otherwise inserts a
    /// new `queued` row. Concurrent submits racing on the unique key never
    /// produce two rows; the loser reads back the winner's id.
    async fn submit(
        &self,
        user_id: Uuid,
        studio_type: StudioType,
        request_hash: String,
        payload: serde_json::Value,
        meta: serde_json::Value,
    ) -> OrchestratorResult<Job>;

    /// Atomically claims up to `batch_size` eligible jobs for `studio_type`
    /// (`queued` and due, plus - if `stale_after` is set - `running` rows
    /// stuck past that interval) and transitions them to `running`,
    /// incrementing `attempt_count` in the same update.
    async fn claim(
        &self,
        studio_type: StudioType,
        batch_size: usize,
        stale_after: Option<std::time::Duration>,
    ) -> OrchestratorResult<Vec<Job>>;

    async fn get(&self, job_id: Uuid) -> OrchestratorResult<Job>;

    /// `running -> succeeded`.
    async fn mark_succeeded(&self, job_id: Uuid) -> OrchestratorResult<()>;

    /// `running -> stitching` (long-form parent only).
    async fn mark_stitching(&self, job_id: Uuid) -> OrchestratorResult<()>;

    /// `* -> failed`, preserving `error_code`/`error_message`.
    async fn mark_failed(
        &self,
        job_id: Uuid,
        error_code: &str,
        error_message: &str,
    ) -> OrchestratorResult<()>;

    /// `running -> queued` with `next_run_at = now + delay`, leaving
    /// `error_code`/`error_message` populated for the next attempt to
    /// reason about.
    async fn requeue(
        &self,
        job_id: Uuid,
        delay: std::time::Duration,
        error_code: &str,
        error_message: &str,
    ) -> OrchestratorResult<()>;

    async fn cancel(&self, job_id: Uuid) -> OrchestratorResult<bool>;

    /// Shallow-merges `patch` into `meta` (used for the music HITL
    /// `required_action`/`candidate_group_id` flags).
    async fn patch_meta(&self, job_id: Uuid, patch: serde_json::Value) -> OrchestratorResult<Job>;

    /// Due jobs count for a studio partition - backs the worker loop's
    /// periodic heartbeat.
    async fn due_count(&self, studio_type: StudioType, now: DateTime<Utc>) -> OrchestratorResult<u64>;
}
