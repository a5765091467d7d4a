//! Postgres-backed store implementations.
//!
//! CAS and uniqueness are enforced in SQL, not application code:
//!
//! - the ledger debit is `UPDATE ... WHERE balance = $expected`;
//! - job transitions are `UPDATE ... WHERE status = $expected`;
//! - payment idempotency rides on the primary key of `payment_records`
//!   (unique violation `23505` maps to the duplicate/idempotent path).
//!
//! All implementations share one `PgPool`; every operation maps sqlx errors
//! into the owning component's storage error.

mod budget;
mod jobs;
mod ledger;
mod payments;
mod usage;

pub use budget::PostgresBudgetPeriodStore;
pub use jobs::PostgresJobStore;
pub use ledger::PostgresCreditLedger;
pub use payments::PostgresPaymentStore;
pub use usage::PostgresUsageLog;

use sqlx::PgPool;

/// PostgreSQL unique-violation error code.
pub(crate) const UNIQUE_VIOLATION: &str = "23505";

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION)
    )
}

/// Create the pipeline tables if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            owner_id UUID PRIMARY KEY,
            balance BIGINT NOT NULL DEFAULT 0 CHECK (balance >= 0),
            version BIGINT NOT NULL DEFAULT 0,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id UUID PRIMARY KEY,
            owner_id UUID NOT NULL,
            style TEXT NOT NULL,
            input_ref TEXT NOT NULL,
            output_ref TEXT,
            status TEXT NOT NULL,
            error TEXT,
            unseen BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS jobs_owner_created_idx ON jobs (owner_id, created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS jobs_status_updated_idx ON jobs (status, updated_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS payment_records (
            transaction_id TEXT PRIMARY KEY,
            owner_id UUID,
            amount_cents BIGINT NOT NULL,
            currency TEXT NOT NULL,
            credits_granted BIGINT NOT NULL,
            status TEXT NOT NULL,
            customer_email TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            credited_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS usage_events (
            id UUID PRIMARY KEY,
            owner_id UUID NOT NULL,
            credits_used BIGINT NOT NULL,
            operation TEXT NOT NULL,
            job_id UUID,
            occurred_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS usage_events_occurred_idx ON usage_events (occurred_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS budget_periods (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL,
            total_limit BIGINT NOT NULL,
            period_start TIMESTAMPTZ NOT NULL,
            period_end TIMESTAMPTZ NOT NULL,
            alert_threshold DOUBLE PRECISION NOT NULL,
            hard_limit_enabled BOOLEAN NOT NULL DEFAULT FALSE
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
