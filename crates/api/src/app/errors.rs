use axum::http::{HeaderValue, StatusCode};
use axum::response::IntoResponse;
use serde_json::json;

use sketchforge_core::DomainError;

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::Auth => json_error(StatusCode::FORBIDDEN, "forbidden", "forbidden"),
        DomainError::InsufficientCredits => json_error(
            StatusCode::PAYMENT_REQUIRED,
            "insufficient_credits",
            "Insufficient credits. Please purchase more credits to continue.",
        ),
        DomainError::InsufficientBudget => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "budget_limit_exceeded",
            "Service temporarily unavailable due to budget limits. Please try again later.",
        ),
        DomainError::RateLimited { retry_after_secs } => {
            let mut response = json_error(
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                format!("Rate limit exceeded. Please wait {retry_after_secs} seconds before trying again."),
            );
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
            response
        }
        DomainError::TransformFailure(msg) => {
            json_error(StatusCode::BAD_GATEWAY, "transform_failed", msg)
        }
        DomainError::ConcurrencyConflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DomainError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DomainError::Storage(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
