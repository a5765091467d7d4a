//! Postgres budget period store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use sketchforge_budget::{BudgetPeriod, BudgetPeriodStore, BudgetStoreError};
use sketchforge_core::BudgetPeriodId;

#[derive(Debug, Clone)]
pub struct PostgresBudgetPeriodStore {
    pool: PgPool,
}

impl PostgresBudgetPeriodStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const PERIOD_COLUMNS: &str =
    "id, name, total_limit, period_start, period_end, alert_threshold, hard_limit_enabled";

fn period_from_row(row: &sqlx::postgres::PgRow) -> Result<BudgetPeriod, BudgetStoreError> {
    Ok(BudgetPeriod {
        id: BudgetPeriodId::from_uuid(row.try_get("id").map_err(storage)?),
        name: row.try_get("name").map_err(storage)?,
        total_limit: row.try_get("total_limit").map_err(storage)?,
        period_start: row
            .try_get::<DateTime<Utc>, _>("period_start")
            .map_err(storage)?,
        period_end: row
            .try_get::<DateTime<Utc>, _>("period_end")
            .map_err(storage)?,
        alert_threshold: row.try_get("alert_threshold").map_err(storage)?,
        hard_limit_enabled: row.try_get("hard_limit_enabled").map_err(storage)?,
    })
}

fn storage(error: impl std::fmt::Display) -> BudgetStoreError {
    BudgetStoreError::Storage(error.to_string())
}

#[async_trait]
impl BudgetPeriodStore for PostgresBudgetPeriodStore {
    async fn insert(&self, period: BudgetPeriod) -> Result<(), BudgetStoreError> {
        sqlx::query(
            "INSERT INTO budget_periods (id, name, total_limit, period_start, period_end, alert_threshold, hard_limit_enabled)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(*period.id.as_uuid())
        .bind(&period.name)
        .bind(period.total_limit)
        .bind(period.period_start)
        .bind(period.period_end)
        .bind(period.alert_threshold)
        .bind(period.hard_limit_enabled)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn update(&self, period: BudgetPeriod) -> Result<(), BudgetStoreError> {
        let result = sqlx::query(
            "UPDATE budget_periods
             SET name = $2, total_limit = $3, period_start = $4, period_end = $5,
                 alert_threshold = $6, hard_limit_enabled = $7
             WHERE id = $1",
        )
        .bind(*period.id.as_uuid())
        .bind(&period.name)
        .bind(period.total_limit)
        .bind(period.period_start)
        .bind(period.period_end)
        .bind(period.alert_threshold)
        .bind(period.hard_limit_enabled)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        if result.rows_affected() == 0 {
            return Err(BudgetStoreError::NotFound(period.id));
        }
        Ok(())
    }

    async fn get(&self, id: BudgetPeriodId) -> Result<Option<BudgetPeriod>, BudgetStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PERIOD_COLUMNS} FROM budget_periods WHERE id = $1"
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.map(|row| period_from_row(&row)).transpose()
    }

    async fn active_at(
        &self,
        at: DateTime<Utc>,
    ) -> Result<Option<BudgetPeriod>, BudgetStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PERIOD_COLUMNS} FROM budget_periods
             WHERE period_start <= $1 AND period_end > $1
             ORDER BY period_start DESC
             LIMIT 1"
        ))
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.map(|row| period_from_row(&row)).transpose()
    }

    async fn list(&self) -> Result<Vec<BudgetPeriod>, BudgetStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PERIOD_COLUMNS} FROM budget_periods ORDER BY period_start ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter().map(period_from_row).collect()
    }
}
