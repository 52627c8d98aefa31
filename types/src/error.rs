use thiserror::Error;

/// Closed set of reasons a control-plane operation can fail.
///
/// Mirrors the error kinds a caller-facing result type would carry; the
/// scheduler itself never retries any of these.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("account already has a task of this type: {0}")]
    AccountTaken(String),

    #[error("invalid task parameters: {0}")]
    Invalid(String),

    #[error("illegal state for this operation: {0}")]
    IllegalState(String),

    #[error("license task limit reached")]
    TaskLimitReached,

    #[error("license has expired")]
    LicenseExpired,

    #[error("operation not permitted under the current license")]
    LicenseForbidden,

    #[error("global execution lock is busy")]
    Busy,

    #[error("agent error: {0}")]
    AgentError(String),

    #[error("persistence error: {0}")]
    PersistenceError(String),

    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
