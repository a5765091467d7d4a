//! Payment provider webhook.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use tracing::warn;

use sketchforge_payments::PaymentError;

use crate::app::errors;
use crate::app::services::AppServices;

/// Signature header sent by the provider.
pub const SIGNATURE_HEADER: &str = "x-payment-signature";

/// POST /webhooks/payments
///
/// The signature is verified over the raw body **before any state change**.
/// Delivery is at-least-once: the provider retries on non-success, and the
/// reconciler makes replays of the same transaction id a no-op, so every
/// error response here is safe to retry against.
pub async fn payment_webhook(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "missing_signature",
            "missing signature header",
        );
    };

    match services.reconciler.handle_signed(&body, signature).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "received": true,
                "outcome": format!("{outcome:?}"),
            })),
        )
            .into_response(),
        Err(PaymentError::InvalidSignature(e)) => {
            warn!(error = %e, "webhook signature verification failed");
            errors::json_error(StatusCode::BAD_REQUEST, "invalid_signature", e.to_string())
        }
        Err(PaymentError::Malformed(msg)) => {
            errors::json_error(StatusCode::BAD_REQUEST, "malformed_payload", msg)
        }
        Err(PaymentError::Storage(msg)) => {
            // Provider retry is safe: the idempotency check protects replays.
            errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", msg)
        }
    }
}
