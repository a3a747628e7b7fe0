//! Error taxonomy. Every variant carries a stable `error_code`
//! string and a human-readable message; nothing else crosses back to a
//! caller (see [`OrchestratorError::sanitize_for_client`]).

use thiserror::Error;

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// How the worker loop should react to an error surfacing from a processor
/// or from the claim/submit path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Reject at submit; the job is never enqueued.
    RejectAtSubmit,
    /// Requeue with backoff; transient and worth another attempt.
    Requeue,
    /// Mark the job `failed`; no further attempts.
    Fail,
}

#[derive(Error, Debug, Clone)]
pub enum OrchestratorError {
    // ---- Validation (reject at submit) ----
    #[error("bad_request: {0}")]
    BadRequest(String),
    #[error("invalid_uuid: {0}")]
    InvalidUuid(String),
    #[error("locale_not_allowed: {0}")]
    LocaleNotAllowed(String),

    // ---- Auth (reject at submit) ----
    #[error("missing_token")]
    MissingToken,
    #[error("invalid_token: {0}")]
    InvalidToken(String),
    #[error("missing_actor_user_id")]
    MissingActorUserId,
    #[error("actor_user_not_found: {0}")]
    ActorUserNotFound(String),

    // ---- Feasibility (reject at submit) ----
    #[error("svc_to_svc_bearer_missing")]
    SvcToSvcBearerMissing,
    #[error("quote_expired")]
    QuoteExpired,
    #[error("too_many_segments: {0}")]
    TooManySegments(String),

    // ---- Transient provider (requeue with backoff) ----
    #[error("provider_5xx: {0}")]
    Provider5xx(String),
    #[error("provider_timeout: {0}")]
    ProviderTimeout(String),
    #[error("network_error: {0}")]
    NetworkError(String),

    // ---- Permanent provider (fail) ----
    #[error("provider_4xx: {0}")]
    Provider4xx(String),
    #[error("content_policy_violation: {0}")]
    ContentPolicyViolation(String),
    #[error("invalid_face_input: {0}")]
    InvalidFaceInput(String),

    // ---- Internal (fail, preserve context) ----
    #[error("WORKER_CRASH: {0}")]
    WorkerCrash(String),
    #[error("STITCH_FAILED: {0}")]
    StitchFailed(String),
    #[error("commerce_worker_error: {0}")]
    CommerceWorkerError(String),
    #[error("internal: {0}")]
    Internal(String),

    // ---- Safety (fail, user-visible message) ----
    #[error("unsafe_prompt: {0}")]
    UnsafePrompt(String),
    #[error("unsafe_image: {0}")]
    UnsafeImage(String),

    // ---- Timeout (fail unless classified recoverable by the processor) ----
    #[error("TIMEOUT: {0}")]
    Timeout(String),
}

impl OrchestratorError {
    /// Stable string code, independent of the message - what clients and
    /// `Job.error_code` persist.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::InvalidUuid(_) => "invalid_uuid",
            Self::LocaleNotAllowed(_) => "locale_not_allowed",
            Self::MissingToken => "missing_token",
            Self::InvalidToken(_) => "invalid_token",
            Self::MissingActorUserId => "missing_actor_user_id",
            Self::ActorUserNotFound(_) => "actor_user_not_found",
            Self::SvcToSvcBearerMissing => "svc_to_svc_bearer_missing",
            Self::QuoteExpired => "quote_expired",
            Self::TooManySegments(_) => "too_many_segments",
            Self::Provider5xx(_) => "provider_5xx",
            Self::ProviderTimeout(_) => "provider_timeout",
            Self::NetworkError(_) => "network_error",
            Self::Provider4xx(_) => "provider_4xx",
            Self::ContentPolicyViolation(_) => "content_policy_violation",
            Self::InvalidFaceInput(_) => "invalid_face_input",
            Self::WorkerCrash(_) => "WORKER_CRASH",
            Self::StitchFailed(_) => "STITCH_FAILED",
            Self::CommerceWorkerError(_) => "commerce_worker_error",
            Self::Internal(_) => "internal",
            Self::UnsafePrompt(_) => "unsafe_prompt",
            Self::UnsafeImage(_) => "unsafe_image",
            Self::Timeout(_) => "TIMEOUT",
        }
    }

    /// Default disposition per the taxonomy table. Processors may override
    /// (e.g. treat a `Timeout` as recoverable) by requeuing explicitly
    /// instead of propagating the error as-is.
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::BadRequest(_)
            | Self::InvalidUuid(_)
            | Self::LocaleNotAllowed(_)
            | Self::MissingToken
            | Self::InvalidToken(_)
            | Self::MissingActorUserId
            | Self::ActorUserNotFound(_)
            | Self::SvcToSvcBearerMissing
            | Self::QuoteExpired
            | Self::TooManySegments(_) => Disposition::RejectAtSubmit,

            Self::Provider5xx(_) | Self::ProviderTimeout(_) | Self::NetworkError(_) => {
                Disposition::Requeue
            }

            Self::Provider4xx(_)
            | Self::ContentPolicyViolation(_)
            | Self::InvalidFaceInput(_)
            | Self::WorkerCrash(_)
            | Self::StitchFailed(_)
            | Self::CommerceWorkerError(_)
            | Self::Internal(_)
            | Self::UnsafePrompt(_)
            | Self::UnsafeImage(_)
            | Self::Timeout(_) => Disposition::Fail,
        }
    }

    /// The message half of `(error_code, error_message)`, safe to return to
    /// a caller - never a `source()` chain or stack detail.
    pub fn client_message(&self) -> String {
        self.to_string()
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization error: {err}"))
    }
}

impl From<pipeline_queue::QueueError> for OrchestratorError {
    fn from(err: pipeline_queue::QueueError) -> Self {
        Self::Internal(format!("queue error: {err}"))
    }
}

impl From<pipeline_blob::BlobError> for OrchestratorError {
    fn from(err: pipeline_blob::BlobError) -> Self {
        Self::Internal(format!("blob error: {err}"))
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for OrchestratorError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(format!("db error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_is_stable_and_message_free() {
        let e = OrchestratorError::Provider5xx("upstream said 503".into());
        assert_eq!(e.error_code(), "provider_5xx");
        assert_eq!(e.disposition(), Disposition::Requeue);
    }

    #[test]
    fn validation_errors_reject_at_submit() {
        assert_eq!(
            OrchestratorError::TooManySegments("41 > 40".into()).disposition(),
            Disposition::RejectAtSubmit
        );
    }

    #[test]
    fn safety_errors_fail() {
        assert_eq!(
            OrchestratorError::UnsafePrompt("blocked keyword".into()).disposition(),
            Disposition::Fail
        );
    }
}
