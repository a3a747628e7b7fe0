//! Typed configuration surface, layered
//! on top of [`pipeline_core::PipelineConfig`]'s free-form string store the
//! way the rest of this workspace layers typed settings over it.

use std::collections::HashMap;
use std::time::Duration;

use pipeline_core::PipelineConfig;

/// Per-artifact-kind signed URL TTL policy.
#[derive(Debug, Clone)]
pub struct UrlTtlPolicy {
    pub face_image: Duration,
    pub recent_video: Duration,
    pub default_video: Duration,
    pub recent_window: Duration,
}

impl Default for UrlTtlPolicy {
    fn default() -> Self {
        Self {
            face_image: Duration::from_secs(2 * 24 * 3600),
            recent_video: Duration::from_secs(15 * 24 * 3600),
            default_video: Duration::from_secs(24 * 3600),
            recent_window: Duration::from_secs(15 * 24 * 3600),
        }
    }
}

/// Long-form fan-out caps.
#[derive(Debug, Clone)]
pub struct LongformLimits {
    pub target_segment_seconds: u32,
    pub max_segment_seconds: u32,
    pub provider_hard_cap_seconds: u32,
    pub words_per_minute: u32,
    pub max_total_segments_per_job: u32,
    pub max_inflight_per_job: usize,
}

impl Default for LongformLimits {
    fn default() -> Self {
        Self {
            target_segment_seconds: 60,
            max_segment_seconds: 120,
            provider_hard_cap_seconds: 120,
            words_per_minute: 150,
            max_total_segments_per_job: 40,
            max_inflight_per_job: 4,
        }
    }
}

/// Safety-model thresholds.
#[derive(Debug, Clone, Default)]
pub struct SafetySettings {
    pub blocked_keywords: Vec<String>,
}

/// Provider polling cadence/deadlines.
#[derive(Debug, Clone)]
pub struct ProviderPolicy {
    pub poll_interval: Duration,
    pub total_deadline: Duration,
}

impl Default for ProviderPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            total_deadline: Duration::from_secs(20 * 60),
        }
    }
}

/// Every knob the pipeline's runtime configuration surface exposes.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub worker_poll_interval: Duration,
    pub worker_batch_size: usize,
    pub max_inflight_per_job: usize,
    pub job_stale_after: Option<Duration>,
    pub provider: ProviderPolicy,
    pub url_ttl: UrlTtlPolicy,
    pub longform: LongformLimits,
    pub safety: SafetySettings,
    pub storage_containers: HashMap<String, String>,
    pub base_retry_backoff: Duration,
    pub max_retry_backoff: Duration,
    pub dashboard_staleness_threshold: Duration,
    pub dashboard_force_on_miss: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let mut storage_containers = HashMap::new();
        storage_containers.insert("audio".to_string(), "audio-output".to_string());
        storage_containers.insert("image".to_string(), "face-output".to_string());
        storage_containers.insert("video".to_string(), "video-output".to_string());
        storage_containers.insert("face".to_string(), "face-output".to_string());
        storage_containers.insert("music".to_string(), "music-output".to_string());

        Self {
            worker_poll_interval: Duration::from_millis(500),
            worker_batch_size: 10,
            max_inflight_per_job: 4,
            job_stale_after: Some(Duration::from_secs(15 * 60)),
            provider: ProviderPolicy::default(),
            url_ttl: UrlTtlPolicy::default(),
            longform: LongformLimits::default(),
            safety: SafetySettings::default(),
            storage_containers,
            base_retry_backoff: Duration::from_secs(2),
            max_retry_backoff: Duration::from_secs(3600),
            dashboard_staleness_threshold: Duration::from_secs(30),
            dashboard_force_on_miss: false,
        }
    }
}

impl PipelineSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn storage_container(&self, kind: &str) -> &str {
        self.storage_containers
            .get(kind)
            .map(|s| s.as_str())
            .unwrap_or("default-output")
    }

    /// Layer overrides from a [`PipelineConfig`] snapshot, mirroring the
    /// `load_env_config` helper documented on `PipelineConfig`
    /// (`PREFIX__SECTION__KEY` -> dotted lowercase keys).
    pub fn apply_overrides(mut self, config: &PipelineConfig) -> Self {
        if let Some(v) = config.get("worker.poll_interval_ms").and_then(|s| s.parse().ok()) {
            self.worker_poll_interval = Duration::from_millis(v);
        }
        if let Some(v) = config.get("worker.batch_size").and_then(|s| s.parse().ok()) {
            self.worker_batch_size = v;
        }
        if let Some(v) = config.get("longform.max_total_segments_per_job").and_then(|s| s.parse().ok()) {
            self.longform.max_total_segments_per_job = v;
        }
        if let Some(v) = config.get("longform.max_inflight_per_job").and_then(|s| s.parse().ok()) {
            self.longform.max_inflight_per_job = v;
        }
        if let Some(v) = config.get("dashboard.force_on_miss").and_then(|s| s.parse().ok()) {
            self.dashboard_force_on_miss = v;
        }
        self
    }

    /// Exponential backoff for a requeue, capped at `max_retry_backoff`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_retry_backoff.as_secs();
        let shift = attempt.saturating_sub(1).min(20);
        let secs = base.saturating_mul(1u64 << shift);
        Duration::from_secs(secs.min(self.max_retry_backoff.as_secs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let s = PipelineSettings::new();
        assert_eq!(s.backoff_for_attempt(1), Duration::from_secs(2));
        assert_eq!(s.backoff_for_attempt(2), Duration::from_secs(4));
        assert_eq!(s.backoff_for_attempt(30), s.max_retry_backoff);
    }

    #[test]
    fn overrides_apply_from_config() {
        let mut cfg = PipelineConfig::new();
        cfg.set("worker.batch_size", "25");
        let settings = PipelineSettings::new().apply_overrides(&cfg);
        assert_eq!(settings.worker_batch_size, 25);
    }
}
