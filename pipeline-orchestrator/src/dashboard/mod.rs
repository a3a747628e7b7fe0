//! Dashboard Cache.
//!
//! Per-user materialized view: gauges, alerts, and two carousels (face
//! images, videos). Reads never block on recomputation - a stale cache row
//! is still returned, with a refresh request enqueued for a background
//! worker to pick up. Carousel items carry only the artifact's stable
//! identity; signed URLs are minted fresh at read time via
//! [`crate::artifact::UrlSigner`] so a cached row never goes stale because
//! an embedded URL expired. Grounded on `dashboard_service.py`'s
//! `get_dashboard`/`_enrich_carousels_with_sas` and the skip-locked refresh
//! queue in the same module's worker.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::{ttl_for_artifact, ArtifactKind, UrlSigner};
use crate::config::UrlTtlPolicy;
use crate::error::OrchestratorResult;

/// One item in a carousel: an artifact's stable identity plus whatever the
/// precompute step captured about it (caption, job id). `signed_url` is
/// populated at read time, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarouselItem {
    pub artifact_id: Uuid,
    pub kind: ArtifactKind,
    pub container: String,
    pub storage_path: String,
    pub created_at: Option<DateTime<Utc>>,
    pub caption: Option<String>,
    #[serde(default)]
    pub signed_url: Option<String>,
}

/// The precomputed, cacheable part of a user's dashboard - everything a
/// stored procedure would fill in, before URL signing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub user_id: Uuid,
    pub gauges: serde_json::Value,
    pub alerts: serde_json::Value,
    pub face_carousel: Vec<CarouselItem>,
    pub video_carousel: Vec<CarouselItem>,
    pub updated_at: DateTime<Utc>,
}

impl DashboardSnapshot {
    /// The zeroed snapshot returned on a cache miss when force-on-miss is
    /// disabled - the dashboard renders empty rather than erroring while a
    /// background refresh fills it in.
    pub fn empty(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            gauges: serde_json::json!({}),
            alerts: serde_json::json!([]),
            face_carousel: Vec::new(),
            video_carousel: Vec::new(),
            updated_at: now,
        }
    }
}

#[async_trait::async_trait]
pub trait DashboardCacheStore: Send + Sync {
    async fn get(&self, user_id: Uuid) -> OrchestratorResult<Option<DashboardSnapshot>>;
    async fn put(&self, snapshot: DashboardSnapshot) -> OrchestratorResult<()>;
}

/// Coalesced refresh signal queue. `enqueue` is idempotent - a second request for a user
/// already pending is a no-op, not a second row.
#[async_trait::async_trait]
pub trait DashboardRefreshQueue: Send + Sync {
    async fn enqueue(&self, user_id: Uuid) -> OrchestratorResult<()>;

    /// Claims up to `batch_size` pending requests (`SELECT ... FOR UPDATE
    /// SKIP LOCKED`) and deletes them in the same transaction, returning
    /// the user ids claimed. A crashed worker simply loses its claimed
    /// batch; the next `enqueue` for those users re-adds them.
    async fn claim_batch(&self, batch_size: usize) -> OrchestratorResult<Vec<Uuid>>;
}

/// The "precomputation stored procedure" - an external
/// collaborator this crate only calls through a trait, same seam as
/// [`crate::longform::stitcher::VideoStitcher`].
#[async_trait::async_trait]
pub trait DashboardPrecompute: Send + Sync {
    async fn compute(&self, user_id: Uuid) -> OrchestratorResult<DashboardSnapshot>;
}

/// Reads a user's dashboard:
/// - cached and fresh -> return as-is.
/// - cached and stale -> enqueue a refresh (non-blocking) and return the
///   stale cache anyway.
/// - absent, force-on-miss enabled -> compute inline, cache it, return it.
/// - absent, force-on-miss disabled -> enqueue a refresh and return an
///   empty snapshot rather than blocking the reader.
///
/// Carousel items are always enriched with freshly-signed URLs regardless
/// of which branch produced the snapshot.
#[allow(clippy::too_many_arguments)]
pub async fn read_dashboard(
    cache: &dyn DashboardCacheStore,
    refresh_queue: &dyn DashboardRefreshQueue,
    precompute: &dyn DashboardPrecompute,
    signer: &dyn UrlSigner,
    url_ttl: &UrlTtlPolicy,
    user_id: Uuid,
    staleness_threshold: std::time::Duration,
    force_on_miss: bool,
) -> OrchestratorResult<DashboardSnapshot> {
    let now = Utc::now();

    let mut snapshot = match cache.get(user_id).await? {
        Some(snap) => {
            let age = now.signed_duration_since(snap.updated_at);
            let threshold = chrono::Duration::from_std(staleness_threshold).unwrap_or_default();
            if age > threshold {
                refresh_queue.enqueue(user_id).await?;
            }
            snap
        }
        None => {
            if force_on_miss {
                let computed = precompute.compute(user_id).await?;
                cache.put(computed.clone()).await?;
                computed
            } else {
                refresh_queue.enqueue(user_id).await?;
                DashboardSnapshot::empty(user_id, now)
            }
        }
    };

    for item in snapshot.face_carousel.iter_mut().chain(snapshot.video_carousel.iter_mut()) {
        let ttl = ttl_for_artifact(item.kind, item.created_at, now, url_ttl);
        item.signed_url = Some(signer.sign_read_url(&item.container, &item.storage_path, ttl).await?);
    }

    Ok(snapshot)
}

/// Batches pending refresh requests and runs the precompute step for each.
/// Processes sequentially; a real deployment
/// may fan this out, but ordering across users carries no invariant worth
/// preserving here.
pub async fn run_refresh_batch(
    cache: &dyn DashboardCacheStore,
    refresh_queue: &dyn DashboardRefreshQueue,
    precompute: &dyn DashboardPrecompute,
    batch_size: usize,
) -> OrchestratorResult<usize> {
    let claimed = refresh_queue.claim_batch(batch_size).await?;
    let mut refreshed = 0;
    for user_id in claimed {
        let snapshot = precompute.compute(user_id).await?;
        cache.put(snapshot).await?;
        refreshed += 1;
    }
    Ok(refreshed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::memory::InMemoryArtifactSigner;
    use crate::dashboard::memory::{MemoryDashboardCacheStore, MemoryDashboardRefreshQueue};
    use std::time::Duration;

    struct StubPrecompute;

    #[async_trait::async_trait]
    impl DashboardPrecompute for StubPrecompute {
        async fn compute(&self, user_id: Uuid) -> OrchestratorResult<DashboardSnapshot> {
            Ok(DashboardSnapshot {
                user_id,
                gauges: serde_json::json!({"jobs_this_month": 3}),
                alerts: serde_json::json!([]),
                face_carousel: vec![CarouselItem {
                    artifact_id: Uuid::new_v4(),
                    kind: ArtifactKind::FaceImage,
                    container: "face-output".to_string(),
                    storage_path: "u1/a1.png".to_string(),
                    created_at: Some(Utc::now()),
                    caption: None,
                    signed_url: None,
                }],
                video_carousel: vec![],
                updated_at: Utc::now(),
            })
        }
    }

    #[tokio::test]
    async fn miss_without_force_on_miss_returns_empty_and_enqueues_refresh() {
        let cache = MemoryDashboardCacheStore::new();
        let queue = MemoryDashboardRefreshQueue::new();
        let signer = InMemoryArtifactSigner::default();
        let user = Uuid::new_v4();

        let snap = read_dashboard(
            &cache,
            &queue,
            &StubPrecompute,
            &signer,
            &UrlTtlPolicy::default(),
            user,
            Duration::from_secs(30),
            false,
        )
        .await
        .unwrap();

        assert!(snap.face_carousel.is_empty());
        assert_eq!(queue.claim_batch(10).await.unwrap(), vec![user]);
    }

    #[tokio::test]
    async fn miss_with_force_on_miss_computes_inline() {
        let cache = MemoryDashboardCacheStore::new();
        let queue = MemoryDashboardRefreshQueue::new();
        let signer = InMemoryArtifactSigner::default();
        let user = Uuid::new_v4();

        let snap = read_dashboard(
            &cache,
            &queue,
            &StubPrecompute,
            &signer,
            &UrlTtlPolicy::default(),
            user,
            Duration::from_secs(30),
            true,
        )
        .await
        .unwrap();

        assert_eq!(snap.face_carousel.len(), 1);
        assert!(snap.face_carousel[0].signed_url.is_some());
        assert!(cache.get(user).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn fresh_cache_hit_does_not_enqueue_refresh() {
        let cache = MemoryDashboardCacheStore::new();
        let queue = MemoryDashboardRefreshQueue::new();
        let signer = InMemoryArtifactSigner::default();
        let user = Uuid::new_v4();

        cache
            .put(DashboardSnapshot::empty(user, Utc::now()))
            .await
            .unwrap();

        read_dashboard(
            &cache,
            &queue,
            &StubPrecompute,
            &signer,
            &UrlTtlPolicy::default(),
            user,
            Duration::from_secs(3600),
            false,
        )
        .await
        .unwrap();

        assert!(queue.claim_batch(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_cache_hit_returns_stale_data_but_enqueues_refresh() {
        let cache = MemoryDashboardCacheStore::new();
        let queue = MemoryDashboardRefreshQueue::new();
        let signer = InMemoryArtifactSigner::default();
        let user = Uuid::new_v4();

        let old = Utc::now() - chrono::Duration::minutes(5);
        cache.put(DashboardSnapshot::empty(user, old)).await.unwrap();

        let snap = read_dashboard(
            &cache,
            &queue,
            &StubPrecompute,
            &signer,
            &UrlTtlPolicy::default(),
            user,
            Duration::from_secs(30),
            false,
        )
        .await
        .unwrap();

        assert_eq!(snap.updated_at, old);
        assert_eq!(queue.claim_batch(10).await.unwrap(), vec![user]);
    }
}
