//! `sketchforge-transform` — client for the external transformation service.
//!
//! The orchestrator treats transformation as an opaque, possibly-failing
//! remote call: `{input, style} -> {output}` or an error. No internal retry
//! is assumed here: the single-fallback policy lives entirely in the
//! orchestrator. Every call is bounded by an explicit timeout; exceeding it
//! is a transform failure, never an unresolved job.

pub mod cache;
pub mod client;
pub mod http;
pub mod prompt;
pub mod validate;

pub use cache::{request_fingerprint, AnalysisCache, InMemoryAnalysisCache};
pub use client::{TransformClient, TransformError, TransformOutput, TransformRequest};
pub use http::{HttpTransformClient, HttpTransformConfig};
pub use prompt::style_prompt;
pub use validate::validate_image_data;
