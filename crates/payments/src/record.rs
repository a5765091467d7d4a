use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sketchforge_core::OwnerId;

/// Settlement status of a payment record.
///
/// The only permitted mutation after creation is a provider-side failure
/// callback correcting `Completed` → `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Completed,
    Failed,
}

/// One payment, keyed by the provider's transaction id.
///
/// Invariant: at most one record per `transaction_id`, enforced at the
/// storage layer (not merely checked in application code) to close the race
/// between a duplicate-check read and a concurrent insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub transaction_id: String,
    /// Absent for guest purchases.
    pub owner_id: Option<OwnerId>,
    pub amount_cents: i64,
    pub currency: String,
    pub credits_granted: i64,
    pub status: PaymentStatus,
    pub customer_email: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set only after the ledger credit was applied; `None` on a completed
    /// record marks the recorded-but-uncredited state the sweep repairs.
    pub credited_at: Option<DateTime<Utc>>,
}

impl PaymentRecord {
    pub fn from_event(event: &crate::event::PaymentEvent) -> Self {
        Self {
            transaction_id: event.transaction_id.clone(),
            owner_id: event.owner_id,
            amount_cents: event.amount_cents,
            currency: event.currency.clone(),
            credits_granted: event.credits,
            status: PaymentStatus::Completed,
            customer_email: event.customer_email.clone(),
            created_at: Utc::now(),
            credited_at: None,
        }
    }
}
