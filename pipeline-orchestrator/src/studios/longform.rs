//! Long-form studio processor.
//!
//! Two halves: [`submit`] turns a script into a parent
//! [`crate::longform::LongformJob`] plus its ordered segment rows (fan-out);
//! [`process`] is what the worker calls on every poll
//! of the parent job - it claims up to the in-flight cap of still-open
//! segments, advances each one tick via [`TtsFaceSegmentProcessor`], then
//! asks [`crate::longform::stitcher::stitch_if_ready`] to fan back in.
//! [`TtsFaceSegmentProcessor`] is the concrete
//! [`crate::longform::stitcher::SegmentProcessor`] grounded on
//! `longform_orchestrator.py`'s `process_one_segment`: TTS is issued only
//! while `audio_url` is unset, fusion only while `video_url` is unset, and a
//! provider call that is still running when the poll deadline elapses
//! leaves the segment exactly where it was rather than failing it - the
//! next claim resumes the same ledger row via `submit_or_resume`.

use uuid::Uuid;

use crate::config::{LongformLimits, ProviderPolicy};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::job::Job;
use crate::longform::chunking::split_script_into_segments;
use crate::longform::stitcher::{
    stitch_if_ready, FinalVideoUploader, SegmentDownloader, SegmentProcessor, VideoStitcher,
};
use crate::longform::{
    LongformJob, LongformJobStatus, LongformSegment, LongformStore, SegmentStatus, VoiceGenderMode,
};
use crate::provider::client::{FaceVideoProvider, ProviderPoller, TtsProvider};
use crate::provider::{idempotency_key, ProviderRunStatus, ProviderRunsLedger};
use crate::studios::{segment_storage_path, submit_or_resume, MediaFetcher, MediaUploader, ProcessorOutcome};

/// Caller-supplied half of a long-form submit: the script plus the
/// per-segment duration knobs, voice policy, and the reusable service
/// credential the segment/stitch workers run under once the submitting
/// request's own bearer has long since expired.
#[derive(Debug, Clone)]
pub struct LongformSubmitRequest {
    pub script_text: String,
    pub segment_seconds: u32,
    pub max_segment_seconds: u32,
    pub voice_config: serde_json::Value,
    pub voice_gender_mode: VoiceGenderMode,
    /// A reusable service bearer, never the caller's own short-lived user
    /// JWT (spec §5 "Long-form Coordinator"). Absence is rejected at
    /// submit as `svc_to_svc_bearer_missing`.
    pub worker_credential: Option<String>,
}

/// Fan-out: validate the requested segment durations against the fusion
/// provider's hard cap, require a reusable service credential for the
/// async workers, chunk the script, reject up front if it would produce
/// more segments than `limits.max_total_segments_per_job` allows, then
/// hand the chunks to the store to create the parent and its segment rows.
pub async fn submit(
    store: &dyn LongformStore,
    job_id: Uuid,
    request: LongformSubmitRequest,
    limits: &LongformLimits,
) -> OrchestratorResult<LongformJob> {
    let cap = limits.provider_hard_cap_seconds;
    if request.segment_seconds > cap || request.max_segment_seconds > cap {
        return Err(OrchestratorError::BadRequest(format!(
            "segment_seconds/max_segment_seconds must be <= {cap}"
        )));
    }
    if request.segment_seconds > request.max_segment_seconds {
        return Err(OrchestratorError::BadRequest(
            "segment_seconds must be <= max_segment_seconds".to_string(),
        ));
    }
    let worker_credential = request
        .worker_credential
        .ok_or(OrchestratorError::SvcToSvcBearerMissing)?;

    let mut chunking_limits = limits.clone();
    chunking_limits.target_segment_seconds = request.segment_seconds;
    chunking_limits.max_segment_seconds = request.max_segment_seconds;

    let chunks = split_script_into_segments(&request.script_text, &chunking_limits);
    if chunks.len() as u32 > limits.max_total_segments_per_job {
        return Err(OrchestratorError::TooManySegments(format!(
            "{} > {}",
            chunks.len(),
            limits.max_total_segments_per_job
        )));
    }
    store
        .submit(
            job_id,
            &chunks,
            request.segment_seconds,
            request.max_segment_seconds,
            request.voice_config,
            request.voice_gender_mode,
            worker_credential,
        )
        .await
}

/// Drives one parent job's poll tick: claim eligible segments, advance each
/// one step, then attempt to stitch. Returns [`ProcessorOutcome::Succeeded`]
/// once the final video is uploaded, propagates a [`OrchestratorError`] if
/// the parent just failed, and otherwise reports
/// [`ProcessorOutcome::InProgress`] so the worker leaves the job `running`
/// for the next poll.
pub async fn process(
    job: &Job,
    store: &dyn LongformStore,
    segment_processor: &dyn SegmentProcessor,
    downloader: &dyn SegmentDownloader,
    stitcher: &dyn VideoStitcher,
    uploader: &dyn FinalVideoUploader,
    max_inflight: usize,
) -> OrchestratorResult<ProcessorOutcome> {
    let longform_job = store.get_job(job.id).await?;

    let claimed = store.claim_segments(longform_job.id, max_inflight).await?;
    for segment in claimed {
        let advanced = segment_processor.advance(segment).await?;
        store.update_segment(advanced).await?;
    }

    stitch_if_ready(store, downloader, stitcher, uploader, job.id, longform_job.id).await?;

    let refreshed = store.get_job(job.id).await?;
    match refreshed.status {
        LongformJobStatus::Succeeded => Ok(ProcessorOutcome::Succeeded),
        LongformJobStatus::Failed => Err(OrchestratorError::StitchFailed(
            refreshed.last_error.unwrap_or_else(|| "long-form job failed".to_string()),
        )),
        LongformJobStatus::Running => Ok(ProcessorOutcome::InProgress),
        LongformJobStatus::Stitching => Ok(ProcessorOutcome::Stitching),
    }
}

/// Per-segment sub-pipeline: TTS, then face-video fusion
/// against a fixed reference image shared by every segment of this job.
#[allow(clippy::too_many_arguments)]
pub struct TtsFaceSegmentProcessor<'a> {
    pub job_id: Uuid,
    pub user_id: Uuid,
    pub face_image_url: String,
    pub ledger: &'a dyn ProviderRunsLedger,
    pub tts: &'a dyn TtsProvider,
    pub face_video: &'a dyn FaceVideoProvider,
    pub poller: &'a dyn ProviderPoller,
    pub fetcher: &'a dyn MediaFetcher,
    pub uploader: &'a dyn MediaUploader,
    pub policy: &'a ProviderPolicy,
    pub container: &'a str,
    pub tts_provider_name: &'a str,
    pub face_provider_name: &'a str,
}

impl<'a> TtsFaceSegmentProcessor<'a> {
    /// Resolves the ledger row a fresh or resumed provider call for one
    /// logical step should use. Attempt 1 is used the first time a step is
    /// entered; a later call that finds the step's previous attempt already
    /// `failed` bumps to a new attempt (and a new idempotency key) rather
    /// than reusing a row that can never resolve again. A call that finds
    /// the previous attempt still in flight (`running`/`submitted`/etc.)
    /// reuses the same key so `submit_or_resume` resumes it instead of
    /// dispatching a duplicate.
    async fn fresh_or_resumed_run(
        &self,
        provider: &str,
        logical_step: &str,
        attempt_count: u32,
        request_json: serde_json::Value,
    ) -> OrchestratorResult<(u32, Uuid)> {
        let mut attempt = attempt_count.max(1);
        let key = idempotency_key(provider, self.job_id, logical_step, attempt);
        let mut run_id = self.ledger.create_run(self.job_id, provider, key, request_json.clone(), serde_json::json!({})).await?;

        if self.ledger.get(run_id).await?.provider_status == ProviderRunStatus::Failed {
            attempt += 1;
            let key = idempotency_key(provider, self.job_id, logical_step, attempt);
            run_id = self.ledger.create_run(self.job_id, provider, key, request_json, serde_json::json!({})).await?;
        }

        Ok((attempt, run_id))
    }
}

#[async_trait::async_trait]
impl<'a> SegmentProcessor for TtsFaceSegmentProcessor<'a> {
    async fn advance(&self, mut segment: LongformSegment) -> OrchestratorResult<LongformSegment> {
        if segment.audio_url.is_none() {
            segment.status = SegmentStatus::AudioRunning;
            let (attempt, run_id) = self
                .fresh_or_resumed_run(
                    self.tts_provider_name,
                    &format!("segment-{}-tts", segment.segment_index),
                    segment.attempt_count,
                    serde_json::json!({"segment_index": segment.segment_index, "text": segment.script_text}),
                )
                .await?;
            segment.attempt_count = attempt;

            match submit_or_resume(self.ledger, run_id, self.poller, self.policy, self.tts.synthesize(&segment.script_text, "default")).await {
                Ok(response) => {
                    let audio_url = response
                        .get("audio_url")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| OrchestratorError::Provider4xx("tts provider response missing audio_url".to_string()))?
                        .to_string();
                    let bytes = self.fetcher.fetch(&audio_url).await?;
                    let storage_path = segment_storage_path(self.user_id, self.job_id, segment.segment_index, "mp3");
                    self.uploader.upload(self.container, &storage_path, "audio/mpeg", bytes).await?;
                    segment.audio_url = Some(audio_url);
                    segment.audio_storage_path = Some(storage_path);
                    segment.tts_job_id = Some(run_id.to_string());
                }
                Err(OrchestratorError::ProviderTimeout(msg)) => {
                    segment.last_error = Some(msg);
                    return Ok(segment);
                }
                Err(err) => {
                    segment.status = SegmentStatus::Failed;
                    segment.last_error = Some(err.to_string());
                    return Ok(segment);
                }
            }
        }

        if segment.video_url.is_none() {
            segment.status = SegmentStatus::VideoRunning;
            let (attempt, run_id) = self
                .fresh_or_resumed_run(
                    self.face_provider_name,
                    &format!("segment-{}-fusion", segment.segment_index),
                    segment.attempt_count,
                    serde_json::json!({"segment_index": segment.segment_index}),
                )
                .await?;
            segment.attempt_count = attempt;

            let audio_url = segment
                .audio_url
                .clone()
                .expect("audio_url set by the branch above before reaching this point");

            match submit_or_resume(
                self.ledger,
                run_id,
                self.poller,
                self.policy,
                self.face_video.animate(&self.face_image_url, &audio_url),
            )
            .await
            {
                Ok(response) => {
                    let video_url = response
                        .get("video_url")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| OrchestratorError::Provider4xx("face-video provider response missing video_url".to_string()))?
                        .to_string();
                    let bytes = self.fetcher.fetch(&video_url).await?;
                    let storage_path = segment_storage_path(self.user_id, self.job_id, segment.segment_index, "mp4");
                    self.uploader.upload(self.container, &storage_path, "video/mp4", bytes).await?;
                    segment.video_url = Some(video_url);
                    segment.video_storage_path = Some(storage_path);
                    segment.fusion_job_id = Some(run_id.to_string());
                    segment.status = SegmentStatus::Succeeded;
                }
                Err(OrchestratorError::ProviderTimeout(msg)) => {
                    segment.last_error = Some(msg);
                    return Ok(segment);
                }
                Err(err) => {
                    segment.status = SegmentStatus::Failed;
                    segment.last_error = Some(err.to_string());
                    return Ok(segment);
                }
            }
        }

        Ok(segment)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::job::{JobStatus, StudioType};
    use crate::longform::memory::MemoryLongformStore;
    use crate::provider::client::ProviderOutcome;
    use crate::provider::memory::MemoryProviderRunsLedger;

    struct StubTts;
    #[async_trait::async_trait]
    impl TtsProvider for StubTts {
        async fn synthesize(&self, _text: &str, _voice: &str) -> OrchestratorResult<ProviderOutcome> {
            Ok(ProviderOutcome::Complete(serde_json::json!({"audio_url": "https://provider.test/seg.mp3"})))
        }
    }

    struct StubFaceVideo;
    #[async_trait::async_trait]
    impl FaceVideoProvider for StubFaceVideo {
        async fn animate(&self, _face_image_url: &str, _audio_url: &str) -> OrchestratorResult<ProviderOutcome> {
            Ok(ProviderOutcome::Complete(serde_json::json!({"video_url": "https://provider.test/seg.mp4"})))
        }
    }

    struct StubPoller;
    #[async_trait::async_trait]
    impl ProviderPoller for StubPoller {
        async fn poll(&self, _provider_job_id: &str) -> OrchestratorResult<ProviderOutcome> {
            Ok(ProviderOutcome::Complete(serde_json::json!({"video_url": "https://provider.test/seg.mp4"})))
        }
    }

    struct StubFetcher;
    #[async_trait::async_trait]
    impl MediaFetcher for StubFetcher {
        async fn fetch(&self, _url: &str) -> OrchestratorResult<Vec<u8>> {
            Ok(vec![1, 2, 3])
        }
    }

    struct StubUploader;
    #[async_trait::async_trait]
    impl MediaUploader for StubUploader {
        async fn upload(&self, _container: &str, _storage_path: &str, _content_type: &str, _bytes: Vec<u8>) -> OrchestratorResult<()> {
            Ok(())
        }
    }

    struct StubDownloader;
    #[async_trait::async_trait]
    impl SegmentDownloader for StubDownloader {
        async fn download(&self, video_url: &str) -> OrchestratorResult<Vec<u8>> {
            Ok(video_url.as_bytes().to_vec())
        }
    }

    struct StubStitcher;
    #[async_trait::async_trait]
    impl VideoStitcher for StubStitcher {
        async fn stitch(&self, segments: &[Vec<u8>]) -> OrchestratorResult<Vec<u8>> {
            Ok(segments.concat())
        }
    }

    struct StubFinalUploader;
    #[async_trait::async_trait]
    impl FinalVideoUploader for StubFinalUploader {
        async fn upload_final(&self, job_id: Uuid, bytes: Vec<u8>) -> OrchestratorResult<crate::longform::stitcher::StitchedOutput> {
            Ok(crate::longform::stitcher::StitchedOutput {
                storage_path: format!("longform-output/{job_id}/final.mp4"),
                signed_url: format!("https://example.test/{job_id}/final.mp4?len={}", bytes.len()),
            })
        }
    }

    fn test_job(id: Uuid) -> Job {
        let now = Utc::now();
        Job {
            id,
            studio_type: StudioType::Longform,
            status: JobStatus::Running,
            user_id: Uuid::new_v4(),
            request_hash: "h".to_string(),
            payload: serde_json::json!({}),
            meta: serde_json::json!({}),
            error_code: None,
            error_message: None,
            attempt_count: 1,
            next_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn test_request(script_text: &str) -> LongformSubmitRequest {
        LongformSubmitRequest {
            script_text: script_text.to_string(),
            segment_seconds: 60,
            max_segment_seconds: 120,
            voice_config: serde_json::json!({}),
            voice_gender_mode: VoiceGenderMode::Auto,
            worker_credential: Some("Bearer svc-token".to_string()),
        }
    }

    #[tokio::test]
    async fn submit_rejects_scripts_that_would_exceed_the_segment_cap() {
        let store = MemoryLongformStore::new();
        let mut limits = LongformLimits::default();
        limits.max_total_segments_per_job = 1;
        let script = "One. Two. Three. Four.";

        let err = submit(&store, Uuid::new_v4(), test_request(script), &limits)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "too_many_segments");
    }

    #[tokio::test]
    async fn submit_rejects_segment_seconds_over_the_provider_cap() {
        let store = MemoryLongformStore::new();
        let limits = LongformLimits::default();
        let mut request = test_request("One. Two.");
        request.segment_seconds = 121;

        let err = submit(&store, Uuid::new_v4(), request, &limits).await.unwrap_err();
        assert_eq!(err.error_code(), "bad_request");
    }

    #[tokio::test]
    async fn submit_rejects_max_segment_seconds_over_the_provider_cap() {
        let store = MemoryLongformStore::new();
        let limits = LongformLimits::default();
        let mut request = test_request("One. Two.");
        request.max_segment_seconds = 200;

        let err = submit(&store, Uuid::new_v4(), request, &limits).await.unwrap_err();
        assert_eq!(err.error_code(), "bad_request");
    }

    #[tokio::test]
    async fn submit_rejects_segment_seconds_over_max_segment_seconds() {
        let store = MemoryLongformStore::new();
        let limits = LongformLimits::default();
        let mut request = test_request("One. Two.");
        request.segment_seconds = 90;
        request.max_segment_seconds = 60;

        let err = submit(&store, Uuid::new_v4(), request, &limits).await.unwrap_err();
        assert_eq!(err.error_code(), "bad_request");
    }

    #[tokio::test]
    async fn submit_rejects_a_missing_worker_credential() {
        let store = MemoryLongformStore::new();
        let limits = LongformLimits::default();
        let mut request = test_request("One. Two.");
        request.worker_credential = None;

        let err = submit(&store, Uuid::new_v4(), request, &limits).await.unwrap_err();
        assert_eq!(err.error_code(), "svc_to_svc_bearer_missing");
    }

    #[tokio::test]
    async fn process_runs_segments_to_completion_and_stitches() {
        let store = MemoryLongformStore::new();
        let job_id = Uuid::new_v4();
        let limits = LongformLimits::default();
        submit(
            &store,
            job_id,
            test_request("Hello there. General Kenobi."),
            &limits,
        )
        .await
        .unwrap();

        let ledger = MemoryProviderRunsLedger::new();
        let policy = ProviderPolicy::default();
        let job = test_job(job_id);

        let segment_processor = TtsFaceSegmentProcessor {
            job_id,
            user_id: job.user_id,
            face_image_url: "https://input.test/face.png".to_string(),
            ledger: &ledger,
            tts: &StubTts,
            face_video: &StubFaceVideo,
            poller: &StubPoller,
            fetcher: &StubFetcher,
            uploader: &StubUploader,
            policy: &policy,
            container: "video-output",
            tts_provider_name: "svc-tts",
            face_provider_name: "svc-facevideo",
        };

        // First tick resolves every claimed segment through audio+video in
        // one pass (the shared polling helper already blocks to completion).
        let outcome = process(&job, &store, &segment_processor, &StubDownloader, &StubStitcher, &StubFinalUploader, 4)
            .await
            .unwrap();

        assert_eq!(outcome, ProcessorOutcome::Succeeded);
        let final_job = store.get_job(job_id).await.unwrap();
        assert!(final_job.final_storage_path.is_some());
    }
}
