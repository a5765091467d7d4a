use std::sync::Arc;

use axum::{
    extract::Extension, http::StatusCode, response::IntoResponse, routing::get, Json, Router,
};

use sketchforge_ledger::CreditLedger;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::OwnerContext;

pub fn router() -> Router {
    Router::new().route("/", get(get_balance))
}

/// GET /credits
///
/// Current balance; creates the account on first sight of the actor.
pub async fn get_balance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
) -> axum::response::Response {
    match services.ledger.ensure_account(owner.owner_id()).await {
        Ok(account) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "balance": account.balance,
                "updated_at": account.updated_at,
            })),
        )
            .into_response(),
        Err(e) => errors::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_error",
            e.to_string(),
        ),
    }
}
