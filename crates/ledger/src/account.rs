use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sketchforge_core::OwnerId;

/// A credit account.
///
/// Invariant: `balance >= 0` at every observation point. Mutated only through
/// [`crate::CreditLedger`] operations; `version` is the optimistic-concurrency
/// token bumped on every successful mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub owner_id: OwnerId,
    pub balance: i64,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Fresh account with a zero balance.
    pub fn new(owner_id: OwnerId) -> Self {
        Self {
            owner_id,
            balance: 0,
            version: 0,
            updated_at: Utc::now(),
        }
    }
}
