//! Postgres credit ledger: the debit CAS is a single conditional `UPDATE`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use sketchforge_core::OwnerId;
use sketchforge_ledger::{Account, CreditLedger, LedgerError};

#[derive(Debug, Clone)]
pub struct PostgresCreditLedger {
    pool: PgPool,
}

impl PostgresCreditLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_account(&self, owner_id: OwnerId) -> Result<Option<Account>, LedgerError> {
        let row = sqlx::query(
            "SELECT owner_id, balance, version, updated_at FROM accounts WHERE owner_id = $1",
        )
        .bind(*owner_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.map(|row| account_from_row(&row)).transpose()
    }
}

fn account_from_row(row: &sqlx::postgres::PgRow) -> Result<Account, LedgerError> {
    Ok(Account {
        owner_id: OwnerId::from_uuid(row.try_get("owner_id").map_err(storage)?),
        balance: row.try_get("balance").map_err(storage)?,
        version: row.try_get::<i64, _>("version").map_err(storage)? as u64,
        updated_at: row
            .try_get::<DateTime<Utc>, _>("updated_at")
            .map_err(storage)?,
    })
}

fn storage(error: impl std::fmt::Display) -> LedgerError {
    LedgerError::Storage(error.to_string())
}

#[async_trait]
impl CreditLedger for PostgresCreditLedger {
    #[instrument(skip(self), fields(owner_id = %owner_id))]
    async fn ensure_account(&self, owner_id: OwnerId) -> Result<Account, LedgerError> {
        sqlx::query(
            "INSERT INTO accounts (owner_id, balance, version, updated_at)
             VALUES ($1, 0, 0, now())
             ON CONFLICT (owner_id) DO NOTHING",
        )
        .bind(*owner_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        self.fetch_account(owner_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(owner_id))
    }

    async fn get_account(&self, owner_id: OwnerId) -> Result<Account, LedgerError> {
        self.fetch_account(owner_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(owner_id))
    }

    async fn get_balance(&self, owner_id: OwnerId) -> Result<i64, LedgerError> {
        self.get_account(owner_id).await.map(|a| a.balance)
    }

    #[instrument(skip(self), fields(owner_id = %owner_id, amount))]
    async fn credit(&self, owner_id: OwnerId, amount: i64) -> Result<i64, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::NonPositiveAmount(amount));
        }

        let row = sqlx::query(
            "UPDATE accounts
             SET balance = balance + $2, version = version + 1, updated_at = now()
             WHERE owner_id = $1
             RETURNING balance",
        )
        .bind(*owner_id.as_uuid())
        .bind(amount)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        match row {
            Some(row) => row.try_get("balance").map_err(storage),
            None => Err(LedgerError::AccountNotFound(owner_id)),
        }
    }

    #[instrument(skip(self), fields(owner_id = %owner_id, amount, expected_balance))]
    async fn debit(
        &self,
        owner_id: OwnerId,
        amount: i64,
        expected_balance: i64,
    ) -> Result<i64, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        if expected_balance < amount {
            return Err(LedgerError::InsufficientBalance {
                actual: expected_balance,
                requested: amount,
            });
        }

        // The CAS: only the writer whose observation still holds wins.
        let row = sqlx::query(
            "UPDATE accounts
             SET balance = balance - $2, version = version + 1, updated_at = now()
             WHERE owner_id = $1 AND balance = $3
             RETURNING balance",
        )
        .bind(*owner_id.as_uuid())
        .bind(amount)
        .bind(expected_balance)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        if let Some(row) = row {
            return row.try_get("balance").map_err(storage);
        }

        // Distinguish a missing account from a moved balance.
        match self.fetch_account(owner_id).await? {
            Some(account) => Err(LedgerError::Conflict {
                expected: expected_balance,
                actual: account.balance,
            }),
            None => Err(LedgerError::AccountNotFound(owner_id)),
        }
    }
}
