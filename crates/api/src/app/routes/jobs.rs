use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use sketchforge_core::{JobId, Style};
use sketchforge_jobs::JobStore;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::OwnerContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(submit_job).get(list_jobs))
        .route("/:id", get(get_job))
        .route("/:id/retry", post(retry_job))
        .route("/:id/seen", post(mark_seen))
}

/// POST /jobs
///
/// Admission runs before anything is persisted; a rejected submission leaves
/// no job behind. Accepted work continues in the background; the 202 body is
/// the caller's receipt, final state arrives over `/stream` or by polling.
pub async fn submit_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Json(body): Json<dto::SubmitJobRequest>,
) -> axum::response::Response {
    let style = match Style::from_str(&body.style) {
        Ok(style) => style,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services
        .orchestrator
        .submit(owner.owner_id(), body.image_data, style)
        .await
    {
        Ok(job) => (StatusCode::ACCEPTED, Json(dto::job_to_json(&job))).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
) -> axum::response::Response {
    match services.jobs.list_for_owner(owner.owner_id()).await {
        Ok(jobs) => {
            let items: Vec<_> = jobs.iter().map(dto::job_to_json).collect();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", e.to_string()),
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let Some(job_id) = parse_job_id(&id) else {
        return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "invalid job id");
    };

    match services.jobs.get(owner.owner_id(), job_id).await {
        Ok(Some(job)) => (StatusCode::OK, Json(dto::job_to_json(&job))).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "job not found"),
        Err(sketchforge_jobs::JobStoreError::OwnerIsolation) => {
            // Another owner's job looks like it does not exist.
            errors::json_error(StatusCode::NOT_FOUND, "not_found", "job not found")
        }
        Err(e) => errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", e.to_string()),
    }
}

/// POST /jobs/:id/retry
///
/// Explicit retry of a failed job; re-enters admission from the top.
pub async fn retry_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let Some(job_id) = parse_job_id(&id) else {
        return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "invalid job id");
    };

    match services.orchestrator.retry(owner.owner_id(), job_id).await {
        Ok(job) => (StatusCode::ACCEPTED, Json(dto::job_to_json(&job))).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn mark_seen(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let Some(job_id) = parse_job_id(&id) else {
        return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "invalid job id");
    };

    match services.jobs.mark_seen(owner.owner_id(), job_id).await {
        Ok(Some(job)) => (StatusCode::OK, Json(dto::job_to_json(&job))).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "job not found"),
        Err(sketchforge_jobs::JobStoreError::OwnerIsolation) => {
            errors::json_error(StatusCode::NOT_FOUND, "not_found", "job not found")
        }
        Err(e) => errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", e.to_string()),
    }
}

fn parse_job_id(raw: &str) -> Option<JobId> {
    JobId::from_str(raw).ok()
}
