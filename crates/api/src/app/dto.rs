//! Request/response DTOs and JSON mapping helpers.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use sketchforge_budget::BudgetPeriod;
use sketchforge_jobs::Job;

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    /// Raw base64 image payload.
    pub image_data: String,
    /// One of: cartoon, pixar, realistic.
    pub style: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateBudgetPeriodRequest {
    pub name: String,
    pub total_limit: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,
    #[serde(default)]
    pub hard_limit_enabled: bool,
}

fn default_alert_threshold() -> f64 {
    0.8
}

#[derive(Debug, Deserialize)]
pub struct UpdateBudgetPeriodRequest {
    pub name: Option<String>,
    pub total_limit: Option<i64>,
    pub alert_threshold: Option<f64>,
    pub hard_limit_enabled: Option<bool>,
}

pub fn job_to_json(job: &Job) -> JsonValue {
    json!({
        "id": job.id,
        "style": job.style,
        "status": job.status,
        "output_ref": job.output_ref,
        "error": job.error,
        "unseen": job.unseen,
        "created_at": job.created_at,
        "updated_at": job.updated_at,
    })
}

pub fn budget_period_to_json(period: &BudgetPeriod) -> JsonValue {
    json!({
        "id": period.id,
        "name": period.name,
        "total_limit": period.total_limit,
        "period_start": period.period_start,
        "period_end": period.period_end,
        "alert_threshold": period.alert_threshold,
        "hard_limit_enabled": period.hard_limit_enabled,
    })
}
