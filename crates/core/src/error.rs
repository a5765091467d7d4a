//! Pipeline error model.

use thiserror::Error;

/// Result type used across the pipeline.
pub type DomainResult<T> = Result<T, DomainError>;

/// Pipeline-level error.
///
/// Admission errors (`InsufficientCredits`, `InsufficientBudget`,
/// `RateLimited`) are surfaced to the caller before a job exists. Errors
/// after a job exists are recorded on the job, never silently lost.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input); rejected before any
    /// side effect.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unauthenticated or unauthorized actor.
    #[error("unauthorized")]
    Auth,

    /// Account balance was not positive at admission time.
    #[error("insufficient credits")]
    InsufficientCredits,

    /// The budget governor's hard limit blocked admission.
    #[error("budget limit exceeded")]
    InsufficientBudget,

    /// Fixed-window rate limit exceeded; retry after the given seconds.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The external transform (and its fallback) failed.
    #[error("transform failed: {0}")]
    TransformFailure(String),

    /// A compare-and-swap update observed a stale value. The caller re-reads
    /// and retries, or records a reconciliation item.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// A requested resource was not found.
    #[error("not found")]
    NotFound,

    /// Transient storage failure (retried with backoff before becoming fatal
    /// for the operation).
    #[error("storage error: {0}")]
    Storage(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::ConcurrencyConflict(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn transform(msg: impl Into<String>) -> Self {
        Self::TransformFailure(msg.into())
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::RateLimited { retry_after_secs }
    }
}
