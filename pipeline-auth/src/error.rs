//! Strategy-resolution errors raised by this crate's own hook wiring
//! (distinct from `pipeline_core::errors::PipelineError`, which covers the
//! Feathers-style service error taxonomy the hooks themselves run inside).

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("unknown authentication strategy: {0}")]
    UnknownStrategy(String),
}
