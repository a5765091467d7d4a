use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sketchforge_core::BudgetPeriodId;

/// A time-boxed spend ceiling.
///
/// Created/updated by the admin surface; read-only to the pipeline itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetPeriod {
    pub id: BudgetPeriodId,
    pub name: String,
    /// Total credits the platform may consume inside the window.
    pub total_limit: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// Usage fraction (0.0–1.0) past which decisions flag `approaching_limit`.
    pub alert_threshold: f64,
    /// When false the limit is advisory: decisions report usage but never block.
    pub hard_limit_enabled: bool,
}

impl BudgetPeriod {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.period_start && at < self.period_end
    }
}
