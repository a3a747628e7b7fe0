//! Studio Processors: per-studio state machines sharing one
//! shape - prepare inputs, submit provider(s) through the ledger, persist
//! artifacts, finalize. Each processor is a free `process()` function
//! rather than a trait object hierarchy, matching the free-function shape
//! already used for [`crate::longform::stitcher::stitch_if_ready`] and
//! [`crate::dashboard::read_dashboard`] - the worker loop dispatches on
//! `job.studio_type` and calls the matching module's `process()`.
//!
//! `submit_or_resume` is the one piece of plumbing every processor shares:
//! it resumes an in-flight provider call from the ledger instead of
//! re-submitting, then polls to completion
//! bounded by [`crate::config::ProviderPolicy`]'s total deadline - the
//! "timed sleeps between checks, not blocking waits" suspension points a
//! long-running fan-out needs.

pub mod audio;
pub mod commerce;
pub mod face;
pub mod fusion;
pub mod longform;
pub mod music;

use uuid::Uuid;

use crate::config::ProviderPolicy;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::provider::client::{ProviderOutcome, ProviderPoller};
use crate::provider::{FinishPatch, ProviderRunStatus, ProviderRunsLedger};

/// What a processor accomplished this tick. Errors are not part of this
/// type - a processor returns `Err(OrchestratorError)` for anything that
/// should requeue or fail the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorOutcome {
    /// Job reached its terminal success state.
    Succeeded,
    /// Long-form parent only: all segments just reached `succeeded`: the
    /// worker should call `JobStore::mark_stitching` before the next poll
    /// hands the job to the stitcher.
    Stitching,
    /// Blocked on human input (music HITL); the job stays `running` with
    /// no transition.
    Blocked,
    /// Long-form parent only: some segments are still short of `succeeded`
    /// (or the parent is mid-`stitching`); nothing terminal happened this
    /// tick. The job stays `running`/`stitching` and is picked up again by
    /// the normal stale-reclaim path.
    InProgress,
}

/// Uploads processed media bytes to blob storage at a caller-chosen key.
/// A narrower seam than [`pipeline_blob::BlobStore`] so processors don't
/// carry stream/multipart concerns they never use.
#[async_trait::async_trait]
pub trait MediaUploader: Send + Sync {
    async fn upload(
        &self,
        container: &str,
        storage_path: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> OrchestratorResult<()>;
}

/// Fetches bytes a provider returned only as a URL (image/audio/video
/// output) so they can be hashed and re-uploaded into this system's own
/// storage. Same shape as [`crate::longform::stitcher::SegmentDownloader`],
/// generalized for any studio.
#[async_trait::async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> OrchestratorResult<Vec<u8>>;
}

/// `{user_id}/{scope_id}/{variant}.{ext}`.
pub fn output_storage_path(user_id: Uuid, scope_id: Uuid, variant: &str, ext: &str) -> String {
    format!("{user_id}/{scope_id}/{variant}.{ext}")
}

/// `{user_id}/{job_id}/{segment}.{ext}`.
pub fn segment_storage_path(user_id: Uuid, job_id: Uuid, segment_index: u32, ext: &str) -> String {
    format!("{user_id}/{job_id}/{segment_index}.{ext}")
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Polls a [`ProviderOutcome::Pending`] result to completion, sleeping
/// `policy.poll_interval` between checks and giving up with a
/// `ProviderTimeout` once `policy.total_deadline` elapses. A `Complete`
/// outcome passed in returns immediately without sleeping at all.
pub async fn resolve_provider_outcome(
    initial: ProviderOutcome,
    poller: &dyn ProviderPoller,
    policy: &ProviderPolicy,
) -> OrchestratorResult<serde_json::Value> {
    match initial {
        ProviderOutcome::Complete(value) => Ok(value),
        ProviderOutcome::Pending { provider_job_id } => {
            let deadline = tokio::time::Instant::now() + policy.total_deadline;
            loop {
                if tokio::time::Instant::now() >= deadline {
                    return Err(OrchestratorError::ProviderTimeout(format!(
                        "provider job {provider_job_id} did not complete within the poll deadline"
                    )));
                }
                tokio::time::sleep(policy.poll_interval).await;
                match poller.poll(&provider_job_id).await? {
                    ProviderOutcome::Complete(value) => return Ok(value),
                    ProviderOutcome::Pending { .. } => continue,
                }
            }
        }
    }
}

/// Resumes an existing ledger row if one is already in flight for this
/// idempotency key, otherwise awaits `submit` to place the first call.
/// Either way, polls through to completion and records the terminal state
/// on the ledger row before returning. On any error the row is marked
/// `failed` with the error's message before the error propagates, so a
/// retry with the same key sees a concrete `FinishPatch::failed` reason
/// rather than a row stuck `running` forever.
pub async fn submit_or_resume<F>(
    ledger: &dyn ProviderRunsLedger,
    run_id: Uuid,
    poller: &dyn ProviderPoller,
    policy: &ProviderPolicy,
    submit: F,
) -> OrchestratorResult<serde_json::Value>
where
    F: std::future::Future<Output = OrchestratorResult<ProviderOutcome>>,
{
    let run = ledger.get(run_id).await?;
    if run.provider_status == ProviderRunStatus::Succeeded {
        return Ok(run.response_json.unwrap_or(serde_json::Value::Null));
    }

    let already_running = matches!(run.provider_status, ProviderRunStatus::Running) && run.provider_job_id.is_some();

    let initial = if already_running {
        poller.poll(run.provider_job_id.as_deref().unwrap()).await
    } else {
        // Dispatch is distinct from "claimed for polling": mark the row
        // `submitted` before the provider call leaves the process so a crash
        // between dispatch and the first poll result is visible in the
        // ledger instead of reading as a call that never happened.
        ledger
            .finish(
                run_id,
                FinishPatch {
                    provider_status: ProviderRunStatus::Submitted,
                    ..Default::default()
                },
            )
            .await?;
        submit.await
    };

    let initial = match initial {
        Ok(outcome) => outcome,
        Err(err) => {
            let _ = ledger.finish(run_id, FinishPatch::failed(err.to_string())).await;
            return Err(err);
        }
    };

    if let ProviderOutcome::Pending { provider_job_id } = &initial {
        ledger
            .finish(
                run_id,
                FinishPatch {
                    provider_status: ProviderRunStatus::Running,
                    provider_job_id: Some(provider_job_id.clone()),
                    ..Default::default()
                },
            )
            .await?;
    }

    let response = match resolve_provider_outcome(initial, poller, policy).await {
        Ok(r) => r,
        Err(err) => {
            let _ = ledger.finish(run_id, FinishPatch::failed(err.to_string())).await;
            return Err(err);
        }
    };

    ledger.finish(run_id, FinishPatch::succeeded(response.clone())).await?;
    Ok(response)
}
