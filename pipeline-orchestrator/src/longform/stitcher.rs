//! Fan-in: once every segment of a long-form job has succeeded, download
//! its video in order and stitch them into one file. Grounded on
//! `longform_orchestrator.py`'s `stitch_if_ready` - same fail-fast-on-any-
//! segment-failure policy, same "download all, concatenate, upload,
//! mark succeeded" shape, generalized behind [`VideoStitcher`] so this
//! crate doesn't link ffmpeg directly.

use uuid::Uuid;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::longform::{LongformJobStatus, LongformStore, SegmentStatus};

/// Concatenates already-downloaded segment video bytes, in order, into one
/// final video. A concrete implementation shells out to ffmpeg or a
/// platform media SDK; this crate only needs the contract.
#[async_trait::async_trait]
pub trait VideoStitcher: Send + Sync {
    async fn stitch(&self, segments: &[Vec<u8>]) -> OrchestratorResult<Vec<u8>>;
}

/// Fetches bytes for a segment's `video_url` so they can be handed to a
/// [`VideoStitcher`]. A thin seam over an HTTP client so this crate stays
/// free of a concrete one.
#[async_trait::async_trait]
pub trait SegmentDownloader: Send + Sync {
    async fn download(&self, video_url: &str) -> OrchestratorResult<Vec<u8>>;
}

/// Where the stitched result lands - storage path plus a signed URL, same
/// pair `upload_final_mp4` returns in the Python original.
pub struct StitchedOutput {
    pub storage_path: String,
    pub signed_url: String,
}

#[async_trait::async_trait]
pub trait FinalVideoUploader: Send + Sync {
    async fn upload_final(&self, job_id: Uuid, bytes: Vec<u8>) -> OrchestratorResult<StitchedOutput>;
}

/// Checks whether `longform_job_id` is ready to stitch and, if so, does it.
/// No-op unless the parent is `running` or `stitching` (matches the
/// Python guard). Fails the whole parent the moment any segment is
/// `failed`, without waiting for the rest to finish - fan-out/fan-in is
/// fail-fast, not best-effort.
pub async fn stitch_if_ready(
    store: &dyn LongformStore,
    downloader: &dyn SegmentDownloader,
    stitcher: &dyn VideoStitcher,
    uploader: &dyn FinalVideoUploader,
    job_id: Uuid,
    longform_job_id: Uuid,
) -> OrchestratorResult<()> {
    let job = store.get_job(job_id).await?;
    if !matches!(job.status, LongformJobStatus::Running | LongformJobStatus::Stitching) {
        return Ok(());
    }

    if store.any_failed(longform_job_id).await? {
        store
            .set_job_status(
                longform_job_id,
                LongformJobStatus::Failed,
                Some("one or more segments failed".to_string()),
            )
            .await?;
        return Ok(());
    }

    let done = store.count_succeeded(longform_job_id).await?;
    store.set_job_counts(longform_job_id, job.segments_total, done).await?;

    if job.segments_total == 0 || done < job.segments_total {
        return Ok(());
    }

    store.set_job_status(longform_job_id, LongformJobStatus::Stitching, None).await?;

    let segments = store.list_segments(longform_job_id).await?;
    let mut downloaded = Vec::with_capacity(segments.len());
    for segment in &segments {
        let Some(video_url) = segment.video_url.as_deref() else {
            store
                .set_job_status(
                    longform_job_id,
                    LongformJobStatus::Failed,
                    Some(format!("segment {} missing video_url", segment.segment_index)),
                )
                .await?;
            return Ok(());
        };
        downloaded.push(downloader.download(video_url).await?);
    }

    let final_bytes = stitcher
        .stitch(&downloaded)
        .await
        .map_err(|e| OrchestratorError::StitchFailed(e.to_string()))?;

    let output = uploader.upload_final(job_id, final_bytes).await?;
    store
        .set_job_final(longform_job_id, output.storage_path, output.signed_url)
        .await?;
    store.set_job_status(longform_job_id, LongformJobStatus::Succeeded, None).await?;

    Ok(())
}

/// The segment sub-state-machine driver: advances one
/// segment through `audio_running -> video_running -> succeeded`, silently
/// re-polling while the fusion provider job is still running. Grounded on
/// `longform_orchestrator.py`'s `process_one_segment`.
#[async_trait::async_trait]
pub trait SegmentProcessor: Send + Sync {
    /// Runs one step of the sub-pipeline for `segment`, returning its new
    /// state. Never blocks until terminal - a still-running provider job
    /// comes back as `video_running` for the worker loop to reclaim later.
    async fn advance(
        &self,
        segment: crate::longform::LongformSegment,
    ) -> OrchestratorResult<crate::longform::LongformSegment>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::longform::chunking::ScriptChunk;
    use crate::longform::memory::MemoryLongformStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeDownloader;
    #[async_trait::async_trait]
    impl SegmentDownloader for FakeDownloader {
        async fn download(&self, video_url: &str) -> OrchestratorResult<Vec<u8>> {
            Ok(video_url.as_bytes().to_vec())
        }
    }

    struct FakeStitcher {
        calls: AtomicUsize,
    }
    #[async_trait::async_trait]
    impl VideoStitcher for FakeStitcher {
        async fn stitch(&self, segments: &[Vec<u8>]) -> OrchestratorResult<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(segments.concat())
        }
    }

    struct FakeUploader;
    #[async_trait::async_trait]
    impl FinalVideoUploader for FakeUploader {
        async fn upload_final(&self, job_id: Uuid, bytes: Vec<u8>) -> OrchestratorResult<StitchedOutput> {
            Ok(StitchedOutput {
                storage_path: format!("longform-output/{job_id}/final.mp4"),
                signed_url: format!("https://example.test/{job_id}/final.mp4?sig=x&len={}", bytes.len()),
            })
        }
    }

    #[tokio::test]
    async fn stitches_once_all_segments_succeed() {
        let store = MemoryLongformStore::new();
        let job_id = Uuid::new_v4();
        let chunks = vec![
            ScriptChunk { index: 0, text: "a".into(), duration_sec: 10 },
            ScriptChunk { index: 1, text: "b".into(), duration_sec: 10 },
        ];
        let longform_job = store.submit(job_id, &chunks).await.unwrap();

        let mut segments = store.list_segments(longform_job.id).await.unwrap();
        for seg in &mut segments {
            seg.status = SegmentStatus::Succeeded;
            seg.video_url = Some(format!("https://seg/{}", seg.segment_index));
            store.update_segment(seg.clone()).await.unwrap();
        }

        let downloader = FakeDownloader;
        let stitcher = FakeStitcher { calls: AtomicUsize::new(0) };
        let uploader = FakeUploader;

        stitch_if_ready(&store, &downloader, &stitcher, &uploader, job_id, longform_job.id)
            .await
            .unwrap();

        let job = store.get_job(job_id).await.unwrap();
        assert_eq!(job.status, LongformJobStatus::Succeeded);
        assert!(job.final_storage_path.is_some());
        assert_eq!(stitcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fails_fast_when_any_segment_failed() {
        let store = MemoryLongformStore::new();
        let job_id = Uuid::new_v4();
        let chunks = vec![
            ScriptChunk { index: 0, text: "a".into(), duration_sec: 10 },
            ScriptChunk { index: 1, text: "b".into(), duration_sec: 10 },
        ];
        let longform_job = store.submit(job_id, &chunks).await.unwrap();

        let mut segments = store.list_segments(longform_job.id).await.unwrap();
        segments[0].status = SegmentStatus::Succeeded;
        segments[0].video_url = Some("https://seg/0".into());
        store.update_segment(segments[0].clone()).await.unwrap();
        segments[1].status = SegmentStatus::Failed;
        segments[1].last_error = Some("provider_4xx".into());
        store.update_segment(segments[1].clone()).await.unwrap();

        let downloader = FakeDownloader;
        let stitcher = FakeStitcher { calls: AtomicUsize::new(0) };
        let uploader = FakeUploader;

        stitch_if_ready(&store, &downloader, &stitcher, &uploader, job_id, longform_job.id)
            .await
            .unwrap();

        let job = store.get_job(job_id).await.unwrap();
        assert_eq!(job.status, LongformJobStatus::Failed);
        assert_eq!(stitcher.calls.load(Ordering::SeqCst), 0);
    }
}
