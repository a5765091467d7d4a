//! Postgres payment store: idempotency rides on the primary key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use sketchforge_core::OwnerId;
use sketchforge_payments::{PaymentRecord, PaymentStatus, PaymentStore, PaymentStoreError};

use super::is_unique_violation;

#[derive(Debug, Clone)]
pub struct PostgresPaymentStore {
    pool: PgPool,
}

impl PostgresPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const PAYMENT_COLUMNS: &str = "transaction_id, owner_id, amount_cents, currency, credits_granted, status, customer_email, created_at, credited_at";

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<PaymentRecord, PaymentStoreError> {
    let status: String = row.try_get("status").map_err(storage)?;
    let status = match status.as_str() {
        "completed" => PaymentStatus::Completed,
        "failed" => PaymentStatus::Failed,
        other => {
            return Err(PaymentStoreError::Storage(format!(
                "unknown payment status '{other}'"
            )));
        }
    };

    Ok(PaymentRecord {
        transaction_id: row.try_get("transaction_id").map_err(storage)?,
        owner_id: row
            .try_get::<Option<uuid::Uuid>, _>("owner_id")
            .map_err(storage)?
            .map(OwnerId::from_uuid),
        amount_cents: row.try_get("amount_cents").map_err(storage)?,
        currency: row.try_get("currency").map_err(storage)?,
        credits_granted: row.try_get("credits_granted").map_err(storage)?,
        status,
        customer_email: row.try_get("customer_email").map_err(storage)?,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(storage)?,
        credited_at: row
            .try_get::<Option<DateTime<Utc>>, _>("credited_at")
            .map_err(storage)?,
    })
}

fn status_str(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Completed => "completed",
        PaymentStatus::Failed => "failed",
    }
}

fn storage(error: impl std::fmt::Display) -> PaymentStoreError {
    PaymentStoreError::Storage(error.to_string())
}

#[async_trait]
impl PaymentStore for PostgresPaymentStore {
    #[instrument(skip(self, record), fields(transaction_id = %record.transaction_id))]
    async fn insert(&self, record: PaymentRecord) -> Result<(), PaymentStoreError> {
        let result = sqlx::query(
            "INSERT INTO payment_records (transaction_id, owner_id, amount_cents, currency, credits_granted, status, customer_email, created_at, credited_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&record.transaction_id)
        .bind(record.owner_id.map(|o| *o.as_uuid()))
        .bind(record.amount_cents)
        .bind(&record.currency)
        .bind(record.credits_granted)
        .bind(status_str(record.status))
        .bind(&record.customer_email)
        .bind(record.created_at)
        .bind(record.credited_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                Err(PaymentStoreError::Duplicate(record.transaction_id))
            }
            Err(e) => Err(storage(e)),
        }
    }

    async fn get(
        &self,
        transaction_id: &str,
    ) -> Result<Option<PaymentRecord>, PaymentStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_records WHERE transaction_id = $1"
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.map(|row| record_from_row(&row)).transpose()
    }

    async fn mark_credited(
        &self,
        transaction_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), PaymentStoreError> {
        let result = sqlx::query(
            "UPDATE payment_records SET credited_at = $2 WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        if result.rows_affected() == 0 {
            return Err(PaymentStoreError::NotFound(transaction_id.to_string()));
        }
        Ok(())
    }

    async fn list_uncredited(&self) -> Result<Vec<PaymentRecord>, PaymentStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_records
             WHERE status = 'completed' AND credited_at IS NULL
             ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter().map(record_from_row).collect()
    }

    #[instrument(skip(self), fields(transaction_id = %transaction_id))]
    async fn correct_status(
        &self,
        transaction_id: &str,
        status: PaymentStatus,
    ) -> Result<(), PaymentStoreError> {
        let result = sqlx::query(
            "UPDATE payment_records SET status = $2 WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .bind(status_str(status))
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        if result.rows_affected() == 0 {
            return Err(PaymentStoreError::NotFound(transaction_id.to_string()));
        }
        Ok(())
    }
}
