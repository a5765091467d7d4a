//! Append-only record of confirmed credit consumption.
//!
//! Written only after a job reaches `completed`; the budget governor sums
//! these events over its active period. Never mutated or deleted.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sketchforge_core::{JobId, OwnerId};

use crate::store::LedgerError;

/// One confirmed credit consumption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: Uuid,
    pub owner_id: OwnerId,
    pub credits_used: i64,
    pub operation: String,
    pub job_id: Option<JobId>,
    pub occurred_at: DateTime<Utc>,
}

impl UsageEvent {
    pub fn for_job(owner_id: OwnerId, job_id: JobId, credits_used: i64) -> Self {
        Self {
            id: Uuid::now_v7(),
            owner_id,
            credits_used,
            operation: "transform".to_string(),
            job_id: Some(job_id),
            occurred_at: Utc::now(),
        }
    }
}

/// Append-only usage log.
#[async_trait]
pub trait UsageLog: Send + Sync {
    async fn append(&self, event: UsageEvent) -> Result<(), LedgerError>;

    /// Sum of `credits_used` with `start <= occurred_at < end`.
    async fn sum_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, LedgerError>;

    async fn list_for_owner(&self, owner_id: OwnerId) -> Result<Vec<UsageEvent>, LedgerError>;
}

/// In-memory usage log for dev/tests.
#[derive(Debug, Default)]
pub struct InMemoryUsageLog {
    events: RwLock<Vec<UsageEvent>>,
}

impl InMemoryUsageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_sync(&self, event: UsageEvent) -> Result<(), LedgerError> {
        self.events
            .write()
            .map_err(|_| LedgerError::Storage("usage log lock poisoned".to_string()))?
            .push(event);
        Ok(())
    }

    pub fn sum_window_sync(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, LedgerError> {
        let events = self
            .events
            .read()
            .map_err(|_| LedgerError::Storage("usage log lock poisoned".to_string()))?;
        Ok(events
            .iter()
            .filter(|e| e.occurred_at >= start && e.occurred_at < end)
            .map(|e| e.credits_used)
            .sum())
    }
}

#[async_trait]
impl UsageLog for InMemoryUsageLog {
    async fn append(&self, event: UsageEvent) -> Result<(), LedgerError> {
        self.append_sync(event)
    }

    async fn sum_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, LedgerError> {
        self.sum_window_sync(start, end)
    }

    async fn list_for_owner(&self, owner_id: OwnerId) -> Result<Vec<UsageEvent>, LedgerError> {
        let events = self
            .events
            .read()
            .map_err(|_| LedgerError::Storage("usage log lock poisoned".to_string()))?;
        Ok(events
            .iter()
            .filter(|e| e.owner_id == owner_id)
            .cloned()
            .collect())
    }
}
