//! # pipeline-queue: durable job queue for the studio pipeline
//!
//! Multi-tenant job queue with lease-based claim, cancel-wins semantics, and
//! tenant-scoped idempotency. This crate is the Job Store + Claim Engine +
//! Worker Loop layer the studio orchestrator is built on: every studio
//! (face, audio, fusion, music, commerce, long-form) enqueues work here and
//! polls it back through the same `QueueBackend` contract, in-memory for
//! tests and Postgres-backed (`postgres` feature) in production.
//!
//! ## Quick start
//!
//! ```rust
//! use pipeline_queue::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct RenderFaceVariant {
//!     job_id: String,
//!     variant_index: u32,
//! }
//!
//! #[async_trait::async_trait]
//! impl Job for RenderFaceVariant {
//!     type Context = ();
//!     type Result = ();
//!     type Error = JobError;
//!
//!     async fn execute(&self, _ctx: Self::Context) -> Result<Self::Result, Self::Error> {
//!         Ok(())
//!     }
//!
//!     const JOB_TYPE: &'static str = "render_face_variant";
//!     const PRIORITY: JobPriority = JobPriority::High;
//! }
//! ```

pub mod types;
pub mod error;
pub mod codec;
pub mod job;
pub mod backend;
pub mod adapter;
pub mod observability;

pub use adapter::QueueAdapter;
pub use types::{
    JobId, LeaseToken, QueueCtx, JobPriority, JobStatus, JobMessage, JobRecord,
    LeasedJob, QueueCapabilities, JobEvent
};
pub use error::{QueueError, QueueResult, JobError};
pub use codec::{JobCodec, CodecRegistry};
pub use codec::json::JsonCodec;
pub use job::{Job, JobRegistry};
pub use backend::QueueBackend;
pub use adapter::{WorkerHandle, QueueConfig};

pub use observability::{ObservabilityLayer, LiveMetrics};

#[cfg(feature = "postgres")]
pub use backend::postgres::PostgresBackend;

#[cfg(feature = "tracing-opentelemetry")]
pub use observability::tracing::{DistributedTracing, SpanCollector};

/// Prelude for studio processors and worker binaries.
pub mod prelude {
    pub use crate::{
        QueueAdapter, Job, QueueBackend
    };

    pub use crate::{
        QueueCtx, JobId, JobPriority, JobStatus, JobError, QueueResult
    };

    pub use crate::{
        JobCodec, JsonCodec, CodecRegistry
    };

    pub use crate::JobRegistry;

    pub use crate::{ObservabilityLayer, LiveMetrics};

    pub use async_trait::async_trait;
}
