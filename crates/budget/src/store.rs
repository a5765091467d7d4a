//! Budget period storage.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sketchforge_core::BudgetPeriodId;

use crate::period::BudgetPeriod;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BudgetStoreError {
    #[error("budget period not found: {0}")]
    NotFound(BudgetPeriodId),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Store for budget periods.
///
/// Writes come from the admin surface only; the governor just reads the
/// period active at a point in time.
#[async_trait]
pub trait BudgetPeriodStore: Send + Sync {
    async fn insert(&self, period: BudgetPeriod) -> Result<(), BudgetStoreError>;

    async fn update(&self, period: BudgetPeriod) -> Result<(), BudgetStoreError>;

    async fn get(&self, id: BudgetPeriodId) -> Result<Option<BudgetPeriod>, BudgetStoreError>;

    /// The period whose window contains `at`, if any. With overlapping
    /// windows the most recently started one wins.
    async fn active_at(&self, at: DateTime<Utc>) -> Result<Option<BudgetPeriod>, BudgetStoreError>;

    async fn list(&self) -> Result<Vec<BudgetPeriod>, BudgetStoreError>;
}

/// In-memory period store for dev/tests.
#[derive(Debug, Default)]
pub struct InMemoryBudgetPeriodStore {
    periods: RwLock<HashMap<BudgetPeriodId, BudgetPeriod>>,
}

impl InMemoryBudgetPeriodStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_sync(&self, period: BudgetPeriod) -> Result<(), BudgetStoreError> {
        self.periods
            .write()
            .map_err(poisoned)?
            .insert(period.id, period);
        Ok(())
    }

    pub fn active_at_sync(
        &self,
        at: DateTime<Utc>,
    ) -> Result<Option<BudgetPeriod>, BudgetStoreError> {
        let periods = self.periods.read().map_err(poisoned)?;
        Ok(periods
            .values()
            .filter(|p| p.contains(at))
            .max_by_key(|p| p.period_start)
            .cloned())
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> BudgetStoreError {
    BudgetStoreError::Storage("budget store lock poisoned".to_string())
}

#[async_trait]
impl BudgetPeriodStore for InMemoryBudgetPeriodStore {
    async fn insert(&self, period: BudgetPeriod) -> Result<(), BudgetStoreError> {
        self.insert_sync(period)
    }

    async fn update(&self, period: BudgetPeriod) -> Result<(), BudgetStoreError> {
        let mut periods = self.periods.write().map_err(poisoned)?;
        if !periods.contains_key(&period.id) {
            return Err(BudgetStoreError::NotFound(period.id));
        }
        periods.insert(period.id, period);
        Ok(())
    }

    async fn get(&self, id: BudgetPeriodId) -> Result<Option<BudgetPeriod>, BudgetStoreError> {
        Ok(self.periods.read().map_err(poisoned)?.get(&id).cloned())
    }

    async fn active_at(
        &self,
        at: DateTime<Utc>,
    ) -> Result<Option<BudgetPeriod>, BudgetStoreError> {
        self.active_at_sync(at)
    }

    async fn list(&self) -> Result<Vec<BudgetPeriod>, BudgetStoreError> {
        let mut all: Vec<_> = self.periods.read().map_err(poisoned)?.values().cloned().collect();
        all.sort_by_key(|p| p.period_start);
        Ok(all)
    }
}
