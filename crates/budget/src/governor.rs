//! Admission decisions against the active budget period.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, warn};

use sketchforge_ledger::UsageLog;

use crate::store::BudgetPeriodStore;

/// Outcome of a budget check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetDecision {
    pub allowed: bool,
    /// Credits left in the window; `None` when no period is active.
    pub remaining: Option<i64>,
    pub used_percentage: f64,
    /// Usage crossed the period's alert threshold (informational).
    pub approaching_limit: bool,
}

impl BudgetDecision {
    /// Decision used when no period is configured or the aggregate cannot be
    /// computed: admission proceeds.
    fn open() -> Self {
        Self {
            allowed: true,
            remaining: None,
            used_percentage: 0.0,
            approaching_limit: false,
        }
    }
}

/// Gates admission on aggregate credit consumption within the active period.
#[derive(Clone)]
pub struct BudgetGovernor {
    periods: Arc<dyn BudgetPeriodStore>,
    usage: Arc<dyn UsageLog>,
}

impl BudgetGovernor {
    pub fn new(periods: Arc<dyn BudgetPeriodStore>, usage: Arc<dyn UsageLog>) -> Self {
        Self { periods, usage }
    }

    /// Decide whether `requested_credits` may be spent right now.
    ///
    /// Fails open: a storage error while resolving the period or summing
    /// usage allows the request (logged loudly); an internal budgeting
    /// outage must not block paying users.
    pub async fn allow(&self, requested_credits: i64) -> BudgetDecision {
        let now = Utc::now();

        let period = match self.periods.active_at(now).await {
            Ok(Some(period)) => period,
            Ok(None) => return BudgetDecision::open(),
            Err(e) => {
                error!(error = %e, "budget period lookup failed, failing open");
                return BudgetDecision::open();
            }
        };

        let used = match self
            .usage
            .sum_window(period.period_start, period.period_end)
            .await
        {
            Ok(used) => used,
            Err(e) => {
                error!(error = %e, period = %period.id, "budget aggregate failed, failing open");
                return BudgetDecision::open();
            }
        };

        let remaining = (period.total_limit - used).max(0);
        let used_percentage = if period.total_limit > 0 {
            used as f64 / period.total_limit as f64
        } else {
            1.0
        };
        let approaching_limit = used_percentage >= period.alert_threshold;

        if approaching_limit {
            warn!(
                period = %period.id,
                used,
                total_limit = period.total_limit,
                "budget approaching configured limit"
            );
        }

        let allowed = !(period.hard_limit_enabled && remaining < requested_credits);

        BudgetDecision {
            allowed,
            remaining: Some(remaining),
            used_percentage,
            approaching_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};

    use sketchforge_core::{BudgetPeriodId, JobId, OwnerId};
    use sketchforge_ledger::{InMemoryUsageLog, LedgerError, UsageEvent};

    use super::*;
    use crate::period::BudgetPeriod;
    use crate::store::InMemoryBudgetPeriodStore;

    fn active_period(total_limit: i64, hard: bool) -> BudgetPeriod {
        let now = Utc::now();
        BudgetPeriod {
            id: BudgetPeriodId::new(),
            name: "launch month".to_string(),
            total_limit,
            period_start: now - Duration::days(1),
            period_end: now + Duration::days(29),
            alert_threshold: 0.8,
            hard_limit_enabled: hard,
        }
    }

    fn governor_with(
        period: Option<BudgetPeriod>,
        used: i64,
    ) -> BudgetGovernor {
        let periods = Arc::new(InMemoryBudgetPeriodStore::new());
        if let Some(p) = period {
            periods.insert_sync(p).unwrap();
        }
        let usage = Arc::new(InMemoryUsageLog::new());
        for _ in 0..used {
            usage
                .append_sync(UsageEvent::for_job(OwnerId::new(), JobId::new(), 1))
                .unwrap();
        }
        BudgetGovernor::new(periods, usage)
    }

    #[tokio::test]
    async fn hard_limit_blocks_when_exhausted() {
        let governor = governor_with(Some(active_period(100, true)), 100);
        let decision = governor.allow(1).await;
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, Some(0));
        assert!(decision.approaching_limit);
    }

    #[tokio::test]
    async fn soft_limit_reports_but_never_blocks() {
        let governor = governor_with(Some(active_period(100, false)), 100);
        let decision = governor.allow(1).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, Some(0));
        assert!(decision.approaching_limit);
    }

    #[tokio::test]
    async fn under_threshold_is_quietly_allowed() {
        let governor = governor_with(Some(active_period(100, true)), 10);
        let decision = governor.allow(1).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, Some(90));
        assert!(!decision.approaching_limit);
        assert!((decision.used_percentage - 0.1).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn no_active_period_means_open() {
        let governor = governor_with(None, 0);
        let decision = governor.allow(1).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, None);
    }

    struct FailingUsageLog;

    #[async_trait]
    impl UsageLog for FailingUsageLog {
        async fn append(&self, _event: UsageEvent) -> Result<(), LedgerError> {
            Err(LedgerError::Storage("down".to_string()))
        }

        async fn sum_window(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<i64, LedgerError> {
            Err(LedgerError::Storage("down".to_string()))
        }

        async fn list_for_owner(
            &self,
            _owner_id: OwnerId,
        ) -> Result<Vec<UsageEvent>, LedgerError> {
            Err(LedgerError::Storage("down".to_string()))
        }
    }

    #[tokio::test]
    async fn aggregate_failure_fails_open() {
        let periods = Arc::new(InMemoryBudgetPeriodStore::new());
        periods.insert_sync(active_period(100, true)).unwrap();
        let governor = BudgetGovernor::new(periods, Arc::new(FailingUsageLog));

        let decision = governor.allow(1).await;
        assert!(decision.allowed);
    }
}
