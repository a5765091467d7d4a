use axum::{routing::get, Router};

pub mod admin;
pub mod credits;
pub mod jobs;
pub mod system;
pub mod webhooks;

/// Router for all authenticated (owner-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/stream", get(system::stream))
        .nest("/jobs", jobs::router())
        .nest("/credits", credits::router())
        .nest("/admin", admin::router())
}
