//! Long-form Coordinator: fan-out a script into
//! segments, drive each through its own audio -> video sub-pipeline, fan
//! back in by stitching completed segment videos in order. Grounded on
//! `chunking_service.py` (chunking, see [`chunking`]) and
//! `longform_orchestrator.py` (`process_one_segment`/`stitch_if_ready`).

pub mod chunking;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod stitcher;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::OrchestratorResult;

/// Top-level long-form job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LongformJobStatus {
    Running,
    Stitching,
    Succeeded,
    Failed,
}

impl LongformJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stitching => "stitching",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for LongformJobStatus {
    type Err = crate::error::OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "stitching" => Ok(Self::Stitching),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(crate::error::OrchestratorError::Internal(format!(
                "unknown longform job status {other:?}"
            ))),
        }
    }
}

/// Whether a HITL-free pipeline picks a voice automatically or a caller
/// pins one manually. Spec §3 "LongformJob": `voice_gender_mode ∈ {auto,
/// manual}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceGenderMode {
    Auto,
    Manual,
}

impl VoiceGenderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

impl std::str::FromStr for VoiceGenderMode {
    type Err = crate::error::OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            other => Err(crate::error::OrchestratorError::Internal(format!(
                "unknown voice gender mode {other:?}"
            ))),
        }
    }
}

/// Per-segment sub-state-machine: `queued` ->
/// `audio_running` -> `video_running` -> `succeeded`, or `failed` at any
/// point. Mirrors `longform_orchestrator.py`'s `SegmentStatus` enum
/// (`tts_pending`/`video_pending` collapsed here into the two `_running`
/// states).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    Queued,
    AudioRunning,
    VideoRunning,
    Succeeded,
    Failed,
}

impl SegmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::AudioRunning => "audio_running",
            Self::VideoRunning => "video_running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::str::FromStr for SegmentStatus {
    type Err = crate::error::OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "audio_running" => Ok(Self::AudioRunning),
            "video_running" => Ok(Self::VideoRunning),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(crate::error::OrchestratorError::Internal(format!(
                "unknown segment status {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongformJob {
    pub id: Uuid,
    pub job_id: Uuid,
    pub status: LongformJobStatus,
    pub segments_total: u32,
    pub segments_done: u32,
    /// Caller-declared per-segment target, validated at submit against the
    /// fusion provider's 120s hard cap (spec §6 "Provider limits").
    pub segment_seconds: u32,
    pub max_segment_seconds: u32,
    pub voice_config: serde_json::Value,
    pub voice_gender_mode: VoiceGenderMode,
    /// Reusable service credential the segment and stitch workers use for
    /// the async execution that outlives the submitting request's own
    /// bearer token. Never a short-lived user JWT (spec §5, §8 feasibility
    /// `svc_to_svc_bearer_missing`).
    pub worker_credential: String,
    pub final_storage_path: Option<String>,
    pub final_url: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongformSegment {
    pub id: Uuid,
    pub longform_job_id: Uuid,
    pub segment_index: u32,
    pub script_text: String,
    pub status: SegmentStatus,
    pub attempt_count: u32,
    pub tts_job_id: Option<String>,
    pub audio_url: Option<String>,
    pub audio_storage_path: Option<String>,
    pub fusion_job_id: Option<String>,
    pub video_url: Option<String>,
    pub video_storage_path: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persistence contract for long-form parent jobs and their segments.
/// `submit` fans a script out into `LongformSegment` rows per
/// [`chunking::split_script_into_segments`]; the worker loop fans work back
/// in through [`stitcher::stitch_if_ready`].
#[async_trait::async_trait]
pub trait LongformStore: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn submit(
        &self,
        job_id: Uuid,
        chunks: &[chunking::ScriptChunk],
        segment_seconds: u32,
        max_segment_seconds: u32,
        voice_config: serde_json::Value,
        voice_gender_mode: VoiceGenderMode,
        worker_credential: String,
    ) -> OrchestratorResult<LongformJob>;

    async fn get_job(&self, job_id: Uuid) -> OrchestratorResult<LongformJob>;

    async fn list_segments(&self, longform_job_id: Uuid) -> OrchestratorResult<Vec<LongformSegment>>;

    /// Claims up to `max_inflight` segments still short of `succeeded`,
    /// respecting the per-parent in-flight cap.
    async fn claim_segments(
        &self,
        longform_job_id: Uuid,
        max_inflight: usize,
    ) -> OrchestratorResult<Vec<LongformSegment>>;

    async fn update_segment(&self, segment: LongformSegment) -> OrchestratorResult<()>;

    async fn set_job_status(
        &self,
        longform_job_id: Uuid,
        status: LongformJobStatus,
        last_error: Option<String>,
    ) -> OrchestratorResult<()>;

    async fn set_job_counts(&self, longform_job_id: Uuid, total: u32, done: u32) -> OrchestratorResult<()>;

    async fn set_job_final(
        &self,
        longform_job_id: Uuid,
        final_storage_path: String,
        final_url: String,
    ) -> OrchestratorResult<()>;

    async fn any_failed(&self, longform_job_id: Uuid) -> OrchestratorResult<bool>;

    async fn count_succeeded(&self, longform_job_id: Uuid) -> OrchestratorResult<u32>;
}
