//! Transform client contract.

use async_trait::async_trait;

use sketchforge_core::Style;

/// Input to a transformation: the drawing plus the requested style.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformRequest {
    /// Raw base64 image payload (validated at the boundary).
    pub image_data: String,
    pub style: Style,
}

/// A successful transformation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    /// Data URL or remote URL of the generated image.
    pub image_ref: String,
}

/// Transform call failure. All variants are terminal for the attempt; the
/// orchestrator decides whether the fallback path runs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    /// The explicit call-site timeout elapsed.
    #[error("transform timed out")]
    Timeout,

    /// The service answered with a non-success status.
    #[error("transform api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The service answered 2xx but the body was not usable.
    #[error("invalid transform response: {0}")]
    InvalidResponse(String),

    #[error("transform network error: {0}")]
    Network(String),
}

/// Opaque remote transformation service.
///
/// `transform` is the primary (richer, more expensive) path; `transform_direct`
/// is the simpler/cheaper generation path the orchestrator may try **once**
/// after a primary failure. Neither retries internally.
#[async_trait]
pub trait TransformClient: Send + Sync {
    async fn transform(&self, request: &TransformRequest)
        -> Result<TransformOutput, TransformError>;

    async fn transform_direct(
        &self,
        request: &TransformRequest,
    ) -> Result<TransformOutput, TransformError>;
}
