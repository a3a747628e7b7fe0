pub mod metrics;
pub mod tracing;
pub mod analytics;

pub use metrics::{LiveMetrics, MetricsCollector, PerformanceMetrics};
pub use analytics::{PerformanceAnalytics, ObservabilityLayer};

#[cfg(feature = "tracing-opentelemetry")]
pub use tracing::{DistributedTracing, SpanCollector};
