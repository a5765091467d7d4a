//! Postgres usage log (append-only).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use sketchforge_core::{JobId, OwnerId};
use sketchforge_ledger::{LedgerError, UsageEvent, UsageLog};

#[derive(Debug, Clone)]
pub struct PostgresUsageLog {
    pool: PgPool,
}

impl PostgresUsageLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn storage(error: impl std::fmt::Display) -> LedgerError {
    LedgerError::Storage(error.to_string())
}

fn event_from_row(row: &sqlx::postgres::PgRow) -> Result<UsageEvent, LedgerError> {
    Ok(UsageEvent {
        id: row.try_get("id").map_err(storage)?,
        owner_id: OwnerId::from_uuid(row.try_get("owner_id").map_err(storage)?),
        credits_used: row.try_get("credits_used").map_err(storage)?,
        operation: row.try_get("operation").map_err(storage)?,
        job_id: row
            .try_get::<Option<uuid::Uuid>, _>("job_id")
            .map_err(storage)?
            .map(JobId::from_uuid),
        occurred_at: row
            .try_get::<DateTime<Utc>, _>("occurred_at")
            .map_err(storage)?,
    })
}

#[async_trait]
impl UsageLog for PostgresUsageLog {
    async fn append(&self, event: UsageEvent) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO usage_events (id, owner_id, credits_used, operation, job_id, occurred_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(event.id)
        .bind(*event.owner_id.as_uuid())
        .bind(event.credits_used)
        .bind(&event.operation)
        .bind(event.job_id.map(|j| *j.as_uuid()))
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn sum_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, LedgerError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(credits_used), 0)::BIGINT AS total
             FROM usage_events
             WHERE occurred_at >= $1 AND occurred_at < $2",
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;

        row.try_get::<i64, _>("total").map_err(storage)
    }

    async fn list_for_owner(&self, owner_id: OwnerId) -> Result<Vec<UsageEvent>, LedgerError> {
        let rows = sqlx::query(
            "SELECT id, owner_id, credits_used, operation, job_id, occurred_at
             FROM usage_events
             WHERE owner_id = $1
             ORDER BY occurred_at ASC",
        )
        .bind(*owner_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter().map(event_from_row).collect()
    }
}
