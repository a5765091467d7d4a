//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: infrastructure wiring (stores, orchestrator, workers)
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::config::ApiConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub async fn build_app(config: ApiConfig) -> anyhow::Result<Router> {
    let auth_state = middleware::AuthState {
        secret: Arc::new(config.auth_secret.clone().into_bytes()),
    };

    let config = Arc::new(config);
    let services = Arc::new(services::build_services(&config).await?);

    // Protected routes: require a verified actor id.
    let protected = routes::router()
        .layer(Extension(services.clone()))
        .layer(Extension(config.clone()))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    // Public surface: health and the signature-verified payment webhook.
    Ok(Router::new()
        .route("/health", get(routes::system::health))
        .route(
            "/webhooks/payments",
            axum::routing::post(routes::webhooks::payment_webhook),
        )
        .layer(Extension(services))
        .merge(protected)
        .layer(ServiceBuilder::new()))
}
