use thiserror::Error;

/// Failure modes surfaced by the Store, per the claim/commit contract.
///
/// Callers are expected to match on these rather than treat every failure as
/// fatal: a `LeaseLost` on commit means someone else now owns the job, not
/// that anything is broken.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job id already exists: {0}")]
    DuplicateId(String),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("lease lost for job {0}: it is no longer held by worker {1}")]
    LeaseLost(String, i64),

    #[error("unknown config key: {0}")]
    UnknownConfigKey(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
