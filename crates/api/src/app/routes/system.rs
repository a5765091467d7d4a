//! Health, identity echo, and the per-owner event stream.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use tokio::sync::mpsc::unbounded_channel;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use sketchforge_events::SubscriptionError;

use crate::app::services::AppServices;
use crate::context::OwnerContext;

pub async fn health() -> axum::response::Response {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response()
}

pub async fn whoami(Extension(owner): Extension<OwnerContext>) -> axum::response::Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "owner_id": owner.owner_id() })),
    )
        .into_response()
}

/// GET /stream
///
/// Server-sent events for the authenticated owner. Filtering happens
/// server-side; the client never sees another owner's events. Delivery is
/// lossy at-least-once: on a gap the stream emits a `resync` event telling
/// the client to re-fetch a fresh snapshot rather than assume continuity.
pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
) -> axum::response::Response {
    let owner_id = owner.owner_id();
    let mut subscription = services.notifier.subscribe_owner(owner_id);

    let (tx, rx) = unbounded_channel::<Result<SseEvent, Infallible>>();

    tokio::spawn(async move {
        loop {
            match subscription.recv().await {
                Ok(event) => {
                    let data = serde_json::to_string(event.payload())
                        .unwrap_or_else(|_| "{}".to_string());
                    let sse = SseEvent::default().event(event.topic()).data(data);
                    if tx.send(Ok(sse)).is_err() {
                        break; // client went away
                    }
                }
                Err(SubscriptionError::Lagged { skipped }) => {
                    debug!(owner_id = %owner_id, skipped, "sse subscriber lagged");
                    let resync = SseEvent::default()
                        .event("resync")
                        .data(format!("{{\"skipped\":{skipped}}}"));
                    if tx.send(Ok(resync)).is_err() {
                        break;
                    }
                }
                Err(SubscriptionError::Closed) => break,
            }
        }
    });

    Sse::new(UnboundedReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}
