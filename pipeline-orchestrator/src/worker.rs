//! Worker Loop: claim -> dispatch -> terminal status, identical
//! shape for every studio with a studio tag. Grounded on
//! `dog_queue::backend::memory::reaper::LeaseReaper` for the resilient
//! `interval` tick loop that logs and sleeps rather than dying on a
//! transient store error, generalized here to dispatch each claimed batch to
//! a studio-specific processor instead of a single reap step.
//!
//! Every studio processor already reduces to `process(job, ..collaborators)
//! -> OrchestratorResult<ProcessorOutcome>`; [`StudioProcessor`]
//! is the one-method seam that lets the worker dispatch on `job.studio_type`
//! without a match arm per processor's distinct collaborator signature. A
//! panic inside a processor is caught via `tokio::spawn`/`JoinError` and
//! surfaces as [`OrchestratorError::WorkerCrash`], matching the "catch
//! unhandled -> status=failed (WORKER_CRASH)" branch of the loop pseudocode.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::PipelineSettings;
use crate::error::{Disposition, OrchestratorError, OrchestratorResult};
use crate::job::{Job, JobStore, StudioType};
use crate::studios::ProcessorOutcome;

/// One studio's processing step, reduced to the shape every `studios::*::process`
/// free function already has once its collaborators are bound.
#[async_trait::async_trait]
pub trait StudioProcessor: Send + Sync {
    async fn process(&self, job: &Job) -> OrchestratorResult<ProcessorOutcome>;
}

/// Claims, dispatches, and finalizes jobs for every studio it has a
/// registered processor for. Each studio partition is claimed
/// and applied independently so one studio's batch never blocks another's.
pub struct Worker {
    jobs: Arc<dyn JobStore>,
    settings: PipelineSettings,
    processors: HashMap<StudioType, Arc<dyn StudioProcessor>>,
}

impl Worker {
    pub fn new(jobs: Arc<dyn JobStore>, settings: PipelineSettings) -> Self {
        Self {
            jobs,
            settings,
            processors: HashMap::new(),
        }
    }

    pub fn register(mut self, studio_type: StudioType, processor: Arc<dyn StudioProcessor>) -> Self {
        self.processors.insert(studio_type, processor);
        self
    }

    /// One claim+dispatch+apply pass over every registered studio, up to
    /// `max_inflight_per_job` jobs running concurrently per studio.
    /// Returns the number of jobs claimed this tick.
    pub async fn tick(&self) -> OrchestratorResult<usize> {
        let mut claimed_total = 0;
        for studio_type in StudioType::all() {
            let Some(processor) = self.processors.get(studio_type) else {
                continue;
            };

            let claimed = self
                .jobs
                .claim(*studio_type, self.settings.worker_batch_size, self.settings.job_stale_after)
                .await?;
            if claimed.is_empty() {
                continue;
            }
            claimed_total += claimed.len();
            debug!(studio = %studio_type, count = claimed.len(), "claimed jobs");

            for batch in claimed.chunks(self.settings.max_inflight_per_job.max(1)) {
                let handles: Vec<_> = batch
                    .iter()
                    .cloned()
                    .map(|job| {
                        let processor = processor.clone();
                        tokio::spawn(async move {
                            let result = processor.process(&job).await;
                            (job, result)
                        })
                    })
                    .collect();

                for handle in handles {
                    match handle.await {
                        Ok((job, result)) => self.apply_outcome(&job, result).await,
                        Err(join_err) => {
                            error!(error = %join_err, "studio processor task panicked");
                        }
                    }
                }
            }
        }
        Ok(claimed_total)
    }

    async fn apply_outcome(&self, job: &Job, result: OrchestratorResult<ProcessorOutcome>) {
        match result {
            Ok(ProcessorOutcome::Succeeded) => {
                if let Err(e) = self.jobs.mark_succeeded(job.id).await {
                    error!(job_id = %job.id, error = %e, "failed to mark job succeeded");
                }
            }
            Ok(ProcessorOutcome::Stitching) => {
                if let Err(e) = self.jobs.mark_stitching(job.id).await {
                    error!(job_id = %job.id, error = %e, "failed to mark job stitching");
                }
            }
            Ok(ProcessorOutcome::Blocked) | Ok(ProcessorOutcome::InProgress) => {
                // Job stays `running`; HITL resume or the next stale-reclaim
                // picks it back up.
            }
            Err(err) => self.finish_with_error(job, err).await,
        }
    }

    async fn finish_with_error(&self, job: &Job, err: OrchestratorError) {
        match err.disposition() {
            Disposition::Requeue => {
                let delay = self.settings.backoff_for_attempt(job.attempt_count);
                warn!(job_id = %job.id, error_code = err.error_code(), delay = ?delay, "requeuing job after transient error");
                if let Err(e) = self.jobs.requeue(job.id, delay, err.error_code(), &err.client_message()).await {
                    error!(job_id = %job.id, error = %e, "failed to requeue job");
                }
            }
            Disposition::Fail | Disposition::RejectAtSubmit => {
                error!(job_id = %job.id, error_code = err.error_code(), "failing job");
                if let Err(e) = self.jobs.mark_failed(job.id, err.error_code(), &err.client_message()).await {
                    error!(job_id = %job.id, error = %e, "failed to mark job failed");
                }
            }
        }
    }

    /// Emits the periodic `due_count` heartbeat for observability.
    pub async fn heartbeat(&self) {
        let now = chrono::Utc::now();
        for studio_type in StudioType::all() {
            if !self.processors.contains_key(studio_type) {
                continue;
            }
            match self.jobs.due_count(*studio_type, now).await {
                Ok(count) => info!(studio = %studio_type, due_count = count, "worker heartbeat"),
                Err(e) => warn!(studio = %studio_type, error = %e, "heartbeat due_count query failed"),
            }
        }
    }

    /// Runs ticks forever at `settings.worker_poll_interval`, sleeping
    /// between empty ticks and logging through (not dying on) transient
    /// store errors.
    pub async fn run_forever(&self) -> ! {
        let heartbeat_interval = Duration::from_secs(30);
        let mut last_heartbeat = tokio::time::Instant::now();
        loop {
            if last_heartbeat.elapsed() >= heartbeat_interval {
                self.heartbeat().await;
                last_heartbeat = tokio::time::Instant::now();
            }

            match self.tick().await {
                Ok(0) => tokio::time::sleep(self.settings.worker_poll_interval).await,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "worker tick failed, sleeping before retry");
                    tokio::time::sleep(self.settings.worker_poll_interval).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::memory::MemoryJobStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AlwaysSucceeds;

    #[async_trait::async_trait]
    impl StudioProcessor for AlwaysSucceeds {
        async fn process(&self, _job: &Job) -> OrchestratorResult<ProcessorOutcome> {
            Ok(ProcessorOutcome::Succeeded)
        }
    }

    struct AlwaysTimesOut;

    #[async_trait::async_trait]
    impl StudioProcessor for AlwaysTimesOut {
        async fn process(&self, _job: &Job) -> OrchestratorResult<ProcessorOutcome> {
            Err(OrchestratorError::ProviderTimeout("upstream stalled".to_string()))
        }
    }

    struct CountingProcessor(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl StudioProcessor for CountingProcessor {
        async fn process(&self, _job: &Job) -> OrchestratorResult<ProcessorOutcome> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(ProcessorOutcome::Succeeded)
        }
    }

    async fn submit_job(jobs: &MemoryJobStore, studio_type: StudioType) -> Job {
        let user_id = uuid::Uuid::new_v4();
        let payload = serde_json::json!({"n": uuid::Uuid::new_v4().to_string()});
        let hash = crate::job::request_hash(&user_id, &payload);
        jobs.submit(user_id, studio_type, hash, payload, serde_json::json!({})).await.unwrap()
    }

    #[tokio::test]
    async fn tick_claims_and_marks_succeeded_jobs() {
        let jobs = Arc::new(MemoryJobStore::new());
        submit_job(&jobs, StudioType::Audio).await;

        let worker = Worker::new(jobs.clone(), PipelineSettings::new()).register(StudioType::Audio, Arc::new(AlwaysSucceeds));

        let claimed = worker.tick().await.unwrap();
        assert_eq!(claimed, 1);
    }

    #[tokio::test]
    async fn transient_errors_requeue_with_backoff() {
        let jobs = Arc::new(MemoryJobStore::new());
        let job = submit_job(&jobs, StudioType::Face).await;

        let worker = Worker::new(jobs.clone(), PipelineSettings::new()).register(StudioType::Face, Arc::new(AlwaysTimesOut));
        worker.tick().await.unwrap();

        let refreshed = jobs.get(job.id).await.unwrap();
        assert_eq!(refreshed.status, crate::job::JobStatus::Queued);
        assert_eq!(refreshed.error_code.as_deref(), Some("provider_timeout"));
    }

    #[tokio::test]
    async fn unregistered_studio_types_are_left_untouched() {
        let jobs = Arc::new(MemoryJobStore::new());
        submit_job(&jobs, StudioType::Music).await;

        let worker = Worker::new(jobs.clone(), PipelineSettings::new());
        let claimed = worker.tick().await.unwrap();
        assert_eq!(claimed, 0);
    }

    #[tokio::test]
    async fn each_claimed_job_is_processed_exactly_once() {
        let jobs = Arc::new(MemoryJobStore::new());
        for _ in 0..5 {
            submit_job(&jobs, StudioType::Audio).await;
        }
        let count = Arc::new(AtomicUsize::new(0));
        let worker = Worker::new(jobs.clone(), PipelineSettings::new())
            .register(StudioType::Audio, Arc::new(CountingProcessor(count.clone())));

        worker.tick().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }
}
