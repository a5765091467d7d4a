//! Admin budget surface (consumed by an external admin UI).

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;

use sketchforge_budget::{BudgetPeriod, BudgetPeriodStore};
use sketchforge_core::BudgetPeriodId;
use sketchforge_ledger::UsageLog;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::config::ApiConfig;
use crate::context::OwnerContext;

pub fn router() -> Router {
    Router::new()
        .route("/budget/periods", post(create_period).get(list_periods))
        .route("/budget/periods/:id", patch(update_period))
        .route("/budget/stats", get(budget_stats))
}

/// Only the configured admin owner may use this surface.
fn require_admin(config: &ApiConfig, owner: &OwnerContext) -> Result<(), axum::response::Response> {
    match config.admin_owner {
        Some(admin) if admin == owner.owner_id() => Ok(()),
        _ => Err(errors::json_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            "admin privileges required",
        )),
    }
}

pub async fn create_period(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(config): Extension<Arc<ApiConfig>>,
    Extension(owner): Extension<OwnerContext>,
    Json(body): Json<dto::CreateBudgetPeriodRequest>,
) -> axum::response::Response {
    if let Err(response) = require_admin(&config, &owner) {
        return response;
    }
    if body.total_limit <= 0 {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "total_limit must be positive",
        );
    }
    if body.period_end <= body.period_start {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "period_end must be after period_start",
        );
    }

    let period = BudgetPeriod {
        id: BudgetPeriodId::new(),
        name: body.name,
        total_limit: body.total_limit,
        period_start: body.period_start,
        period_end: body.period_end,
        alert_threshold: body.alert_threshold,
        hard_limit_enabled: body.hard_limit_enabled,
    };

    match services.budget_periods.insert(period.clone()).await {
        Ok(()) => (
            StatusCode::CREATED,
            Json(dto::budget_period_to_json(&period)),
        )
            .into_response(),
        Err(e) => errors::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_error",
            e.to_string(),
        ),
    }
}

pub async fn list_periods(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(config): Extension<Arc<ApiConfig>>,
    Extension(owner): Extension<OwnerContext>,
) -> axum::response::Response {
    if let Err(response) = require_admin(&config, &owner) {
        return response;
    }

    match services.budget_periods.list().await {
        Ok(periods) => {
            let items: Vec<_> = periods.iter().map(dto::budget_period_to_json).collect();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => errors::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_error",
            e.to_string(),
        ),
    }
}

pub async fn update_period(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(config): Extension<Arc<ApiConfig>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateBudgetPeriodRequest>,
) -> axum::response::Response {
    if let Err(response) = require_admin(&config, &owner) {
        return response;
    }
    let Ok(period_id) = BudgetPeriodId::from_str(&id) else {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "invalid period id",
        );
    };

    let mut period = match services.budget_periods.get(period_id).await {
        Ok(Some(period)) => period,
        Ok(None) => {
            return errors::json_error(StatusCode::NOT_FOUND, "not_found", "period not found");
        }
        Err(e) => {
            return errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                e.to_string(),
            );
        }
    };

    if let Some(name) = body.name {
        period.name = name;
    }
    if let Some(total_limit) = body.total_limit {
        if total_limit <= 0 {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "total_limit must be positive",
            );
        }
        period.total_limit = total_limit;
    }
    if let Some(alert_threshold) = body.alert_threshold {
        period.alert_threshold = alert_threshold;
    }
    if let Some(hard_limit_enabled) = body.hard_limit_enabled {
        period.hard_limit_enabled = hard_limit_enabled;
    }

    match services.budget_periods.update(period.clone()).await {
        Ok(()) => (StatusCode::OK, Json(dto::budget_period_to_json(&period))).into_response(),
        Err(e) => errors::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_error",
            e.to_string(),
        ),
    }
}

/// GET /admin/budget/stats
///
/// Usage of the active period: consumed, remaining, percentage, window.
pub async fn budget_stats(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(config): Extension<Arc<ApiConfig>>,
    Extension(owner): Extension<OwnerContext>,
) -> axum::response::Response {
    if let Err(response) = require_admin(&config, &owner) {
        return response;
    }

    let period = match services.budget_periods.active_at(Utc::now()).await {
        Ok(Some(period)) => period,
        Ok(None) => {
            return (
                StatusCode::OK,
                Json(serde_json::json!({ "active_period": null })),
            )
                .into_response();
        }
        Err(e) => {
            return errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                e.to_string(),
            );
        }
    };

    let used = match services
        .usage
        .sum_window(period.period_start, period.period_end)
        .await
    {
        Ok(used) => used,
        Err(e) => {
            return errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                e.to_string(),
            );
        }
    };

    let remaining = (period.total_limit - used).max(0);
    let used_percentage = if period.total_limit > 0 {
        used as f64 / period.total_limit as f64
    } else {
        1.0
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "active_period": dto::budget_period_to_json(&period),
            "used_credits": used,
            "remaining_credits": remaining,
            "used_percentage": used_percentage,
            "approaching_limit": used_percentage >= period.alert_threshold,
        })),
    )
        .into_response()
}
