use thiserror::Error;

use crate::session::ClaimStage;

/// Failure taxonomy for the claim pipeline.
///
/// Every external-call failure is converted into one of these variants at the
/// stage boundary; none of them abort the session, which stays at its current
/// stage and can be retried.
#[derive(Debug, Error)]
pub enum ClaimError {
    /// Missing or malformed caller input. Never retried automatically.
    #[error("validation error: {0}")]
    Validation(String),

    /// The vision model, reference store or payout gateway is unavailable or
    /// returned an error. Retryable.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// A lookup completed but found no matching record.
    #[error("not found: {0}")]
    NotFound(String),

    /// The vision model returned text that does not satisfy the report schema.
    #[error("parse error: {0}")]
    Parse(String),

    /// The requested action is not legal from the session's current stage.
    #[error("invalid transition: cannot {action} while session is in stage {from:?}")]
    InvalidTransition {
        from: ClaimStage,
        action: &'static str,
    },

    /// Another request for this session is still in flight.
    #[error("session busy: a request for this session is already in flight")]
    SessionBusy,

    /// The session was reset while this request was in flight; the result
    /// has been discarded.
    #[error("session reset: the in-flight result was discarded")]
    SessionReset,

    #[error("session not found: {0}")]
    SessionNotFound(String),
}

pub type Result<T> = std::result::Result<T, ClaimError>;
