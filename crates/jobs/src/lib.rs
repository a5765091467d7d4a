//! `sketchforge-jobs` — the paid transformation job model.
//!
//! A job moves through a closed state machine:
//!
//! ```text
//! processing --success--> completed      (terminal)
//! processing --failure--> failed
//! failed     --retry----> processing     (explicit retry only)
//! ```
//!
//! All persisted transitions are **conditional**: they apply only while the
//! row still holds the expected prior status, so two concurrent writers (the
//! orchestrator completing a job while the reaper times it out) cannot both
//! win; exactly one transition is persisted.

pub mod rate_limit;
pub mod retry;
pub mod store;
pub mod types;

pub use rate_limit::{FixedWindowRateLimiter, RateLimitDecision, RateLimitError, RateLimiter};
pub use retry::RetryPolicy;
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use types::{Job, JobStatus};
