//! Payment record storage.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::record::{PaymentRecord, PaymentStatus};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentStoreError {
    /// A record with this transaction id already exists. Uniqueness is the
    /// store's responsibility so a concurrent duplicate insert cannot slip
    /// past an earlier existence check.
    #[error("payment record already exists: {0}")]
    Duplicate(String),

    #[error("payment record not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Insert a new record; fails with [`PaymentStoreError::Duplicate`] if
    /// the transaction id was already recorded.
    async fn insert(&self, record: PaymentRecord) -> Result<(), PaymentStoreError>;

    async fn get(&self, transaction_id: &str) -> Result<Option<PaymentRecord>, PaymentStoreError>;

    /// Record that the ledger credit for this transaction was applied.
    async fn mark_credited(
        &self,
        transaction_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), PaymentStoreError>;

    /// Completed records whose credit has not been applied yet (the
    /// reconciliation sweep's work list).
    async fn list_uncredited(&self) -> Result<Vec<PaymentRecord>, PaymentStoreError>;

    /// Status correction for provider-side failure callbacks, the only
    /// permitted mutation of payment facts.
    async fn correct_status(
        &self,
        transaction_id: &str,
        status: PaymentStatus,
    ) -> Result<(), PaymentStoreError>;
}

/// In-memory payment store for dev/tests.
#[derive(Debug, Default)]
pub struct InMemoryPaymentStore {
    records: RwLock<HashMap<String, PaymentRecord>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_sync(&self, record: PaymentRecord) -> Result<(), PaymentStoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        if records.contains_key(&record.transaction_id) {
            return Err(PaymentStoreError::Duplicate(record.transaction_id));
        }
        records.insert(record.transaction_id.clone(), record);
        Ok(())
    }

    pub fn get_sync(
        &self,
        transaction_id: &str,
    ) -> Result<Option<PaymentRecord>, PaymentStoreError> {
        Ok(self
            .records
            .read()
            .map_err(poisoned)?
            .get(transaction_id)
            .cloned())
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> PaymentStoreError {
    PaymentStoreError::Storage("payment store lock poisoned".to_string())
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, record: PaymentRecord) -> Result<(), PaymentStoreError> {
        self.insert_sync(record)
    }

    async fn get(
        &self,
        transaction_id: &str,
    ) -> Result<Option<PaymentRecord>, PaymentStoreError> {
        self.get_sync(transaction_id)
    }

    async fn mark_credited(
        &self,
        transaction_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), PaymentStoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        let record = records
            .get_mut(transaction_id)
            .ok_or_else(|| PaymentStoreError::NotFound(transaction_id.to_string()))?;
        record.credited_at = Some(at);
        Ok(())
    }

    async fn list_uncredited(&self) -> Result<Vec<PaymentRecord>, PaymentStoreError> {
        let records = self.records.read().map_err(poisoned)?;
        let mut out: Vec<_> = records
            .values()
            .filter(|r| r.status == PaymentStatus::Completed && r.credited_at.is_none())
            .cloned()
            .collect();
        out.sort_by_key(|r| r.created_at);
        Ok(out)
    }

    async fn correct_status(
        &self,
        transaction_id: &str,
        status: PaymentStatus,
    ) -> Result<(), PaymentStoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        let record = records
            .get_mut(transaction_id)
            .ok_or_else(|| PaymentStoreError::NotFound(transaction_id.to_string()))?;
        record.status = status;
        Ok(())
    }
}
