//! Webhook handling and the repair sweep.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use sketchforge_ledger::{CreditLedger, LedgerError};

use crate::event::{PaymentEvent, PaymentEventKind};
use crate::record::{PaymentRecord, PaymentStatus};
use crate::signature::{self, SignatureError};
use crate::store::{PaymentStore, PaymentStoreError};

/// Error surfaced to the webhook transport. The provider retries on these,
/// which is safe: a signature/parse failure changed nothing, and an insert
/// failure means the record is absent so the idempotency check still holds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentError {
    #[error("invalid signature: {0}")]
    InvalidSignature(#[from] SignatureError),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// What a successfully handled event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Record inserted and the ledger credited.
    Credited { new_balance: i64 },
    /// Transaction id already recorded; safe replay, nothing done.
    Duplicate,
    /// Record inserted but the credit step failed; repaired by the sweep.
    RecordedUncredited,
    /// Guest purchase: recorded, no account to credit.
    GuestRecorded,
    /// Existing record's status corrected to failed.
    StatusCorrected,
    /// Event kind or payload carries nothing actionable; acknowledged so the
    /// provider stops retrying.
    Ignored,
}

/// Result of one reconciliation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub repaired: usize,
}

/// Turns provider events into payment records and ledger credits.
#[derive(Clone)]
pub struct PaymentReconciler {
    store: Arc<dyn PaymentStore>,
    ledger: Arc<dyn CreditLedger>,
    webhook_secret: Vec<u8>,
    tolerance_secs: i64,
}

impl PaymentReconciler {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        ledger: Arc<dyn CreditLedger>,
        webhook_secret: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            store,
            ledger,
            webhook_secret: webhook_secret.into(),
            tolerance_secs: signature::DEFAULT_TOLERANCE_SECS,
        }
    }

    pub fn with_tolerance_secs(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    /// Full webhook path: verify the signature over the raw body, parse, then
    /// handle. No state changes before the signature checks out.
    pub async fn handle_signed(
        &self,
        body: &[u8],
        signature_header: &str,
    ) -> Result<ReconcileOutcome, PaymentError> {
        signature::verify_signature(
            &self.webhook_secret,
            signature_header,
            body,
            Utc::now().timestamp(),
            self.tolerance_secs,
        )?;

        let event: PaymentEvent =
            serde_json::from_slice(body).map_err(|e| PaymentError::Malformed(e.to_string()))?;

        self.handle_event(event).await
    }

    /// Handle an already-verified event.
    pub async fn handle_event(
        &self,
        event: PaymentEvent,
    ) -> Result<ReconcileOutcome, PaymentError> {
        match event.kind {
            PaymentEventKind::CheckoutCompleted => self.handle_checkout_completed(event).await,
            PaymentEventKind::PaymentFailed => self.handle_payment_failed(event).await,
            PaymentEventKind::Unknown => {
                info!(event_id = %event.id, "ignoring unhandled payment event kind");
                Ok(ReconcileOutcome::Ignored)
            }
        }
    }

    async fn handle_checkout_completed(
        &self,
        event: PaymentEvent,
    ) -> Result<ReconcileOutcome, PaymentError> {
        if event.credits <= 0 {
            // Retrying will not improve a malformed grant; acknowledge it.
            warn!(
                transaction_id = %event.transaction_id,
                credits = event.credits,
                "checkout event without a positive credit grant"
            );
            return Ok(ReconcileOutcome::Ignored);
        }

        // Idempotency: a replayed transaction id is an ok no-op.
        match self.store.get(&event.transaction_id).await {
            Ok(Some(_)) => {
                info!(transaction_id = %event.transaction_id, "payment already recorded, replay ignored");
                return Ok(ReconcileOutcome::Duplicate);
            }
            Ok(None) => {}
            Err(e) => return Err(PaymentError::Storage(e.to_string())),
        }

        // Record first, then credit. The store's uniqueness closes the race
        // between the check above and a concurrent insert of the same id.
        let record = PaymentRecord::from_event(&event);
        match self.store.insert(record).await {
            Ok(()) => {}
            Err(PaymentStoreError::Duplicate(_)) => {
                info!(transaction_id = %event.transaction_id, "lost insert race, replay ignored");
                return Ok(ReconcileOutcome::Duplicate);
            }
            Err(e) => return Err(PaymentError::Storage(e.to_string())),
        }

        let Some(owner_id) = event.owner_id else {
            info!(transaction_id = %event.transaction_id, "guest purchase recorded");
            return Ok(ReconcileOutcome::GuestRecorded);
        };

        match self.ledger.credit(owner_id, event.credits).await {
            Ok(new_balance) => {
                self.finish_credit(&event.transaction_id).await;
                info!(
                    transaction_id = %event.transaction_id,
                    owner_id = %owner_id,
                    credits = event.credits,
                    new_balance,
                    "payment credited"
                );
                Ok(ReconcileOutcome::Credited { new_balance })
            }
            Err(e) => {
                // Recorded but not credited: detectable and repaired by the
                // sweep, never surfaced to the provider as a failure (a retry
                // would hit the idempotency check and change nothing).
                error!(
                    transaction_id = %event.transaction_id,
                    owner_id = %owner_id,
                    error = %e,
                    "credit failed after record insert; left for reconciliation"
                );
                Ok(ReconcileOutcome::RecordedUncredited)
            }
        }
    }

    async fn handle_payment_failed(
        &self,
        event: PaymentEvent,
    ) -> Result<ReconcileOutcome, PaymentError> {
        match self
            .store
            .correct_status(&event.transaction_id, PaymentStatus::Failed)
            .await
        {
            Ok(()) => {
                info!(transaction_id = %event.transaction_id, "payment marked failed");
                Ok(ReconcileOutcome::StatusCorrected)
            }
            Err(PaymentStoreError::NotFound(_)) => {
                warn!(transaction_id = %event.transaction_id, "failure callback for unknown payment");
                Ok(ReconcileOutcome::Ignored)
            }
            Err(e) => Err(PaymentError::Storage(e.to_string())),
        }
    }

    /// Find completed records whose credit never landed and retry the credit.
    pub async fn run_sweep(&self) -> Result<SweepReport, PaymentError> {
        let pending = self
            .store
            .list_uncredited()
            .await
            .map_err(|e| PaymentError::Storage(e.to_string()))?;

        let mut report = SweepReport {
            examined: pending.len(),
            ..SweepReport::default()
        };

        for record in pending {
            let Some(owner_id) = record.owner_id else {
                continue; // guest purchases have nothing to credit
            };

            match self.ledger.credit(owner_id, record.credits_granted).await {
                Ok(new_balance) => {
                    self.finish_credit(&record.transaction_id).await;
                    info!(
                        transaction_id = %record.transaction_id,
                        owner_id = %owner_id,
                        new_balance,
                        "reconciliation sweep applied missing credit"
                    );
                    report.repaired += 1;
                }
                Err(LedgerError::AccountNotFound(_)) => {
                    // Owner has not registered an account yet; try again on
                    // the next sweep.
                    continue;
                }
                Err(e) => {
                    warn!(
                        transaction_id = %record.transaction_id,
                        error = %e,
                        "reconciliation credit attempt failed"
                    );
                }
            }
        }

        Ok(report)
    }

    async fn finish_credit(&self, transaction_id: &str) {
        if let Err(e) = self.store.mark_credited(transaction_id, Utc::now()).await {
            // The credit is applied but the marker write failed; flagged for
            // manual reconciliation rather than retried (a sweep retry here
            // would double-credit).
            error!(
                transaction_id = %transaction_id,
                error = %e,
                "credit applied but marker write failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use sketchforge_core::OwnerId;
    use sketchforge_ledger::InMemoryCreditLedger;

    use super::*;
    use crate::signature::sign_payload;
    use crate::store::InMemoryPaymentStore;

    const SECRET: &[u8] = b"whsec_test";

    struct Fixture {
        reconciler: PaymentReconciler,
        store: Arc<InMemoryPaymentStore>,
        ledger: Arc<InMemoryCreditLedger>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryPaymentStore::new());
        let ledger = Arc::new(InMemoryCreditLedger::new());
        let reconciler = PaymentReconciler::new(store.clone(), ledger.clone(), SECRET);
        Fixture {
            reconciler,
            store,
            ledger,
        }
    }

    fn checkout_event(owner: Option<OwnerId>, tx: &str, credits: i64) -> PaymentEvent {
        PaymentEvent {
            id: format!("evt_{tx}"),
            kind: PaymentEventKind::CheckoutCompleted,
            transaction_id: tx.to_string(),
            owner_id: owner,
            amount_cents: 999,
            currency: "usd".to_string(),
            credits,
            customer_email: Some("buyer@example.com".to_string()),
        }
    }

    #[tokio::test]
    async fn replayed_event_credits_exactly_once() {
        let f = fixture();
        let owner = OwnerId::new();
        f.ledger.ensure_account_sync(owner).unwrap();

        let event = checkout_event(Some(owner), "sess_123", 10);

        let first = f.reconciler.handle_event(event.clone()).await.unwrap();
        assert_eq!(first, ReconcileOutcome::Credited { new_balance: 10 });

        let second = f.reconciler.handle_event(event).await.unwrap();
        assert_eq!(second, ReconcileOutcome::Duplicate);

        // Balance increased by 10 once, not 20.
        assert_eq!(f.ledger.get_account_sync(owner).unwrap().balance, 10);
        assert!(f.store.get_sync("sess_123").unwrap().is_some());
    }

    #[tokio::test]
    async fn signed_path_rejects_bad_signature_without_state_change() {
        let f = fixture();
        let owner = OwnerId::new();
        f.ledger.ensure_account_sync(owner).unwrap();

        let body = serde_json::to_vec(&checkout_event(Some(owner), "sess_sig", 5)).unwrap();
        let header = sign_payload(b"wrong-secret", &body, Utc::now().timestamp());

        let err = f.reconciler.handle_signed(&body, &header).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidSignature(_)));
        assert!(f.store.get_sync("sess_sig").unwrap().is_none());
        assert_eq!(f.ledger.get_account_sync(owner).unwrap().balance, 0);
    }

    #[tokio::test]
    async fn signed_path_accepts_valid_signature() {
        let f = fixture();
        let owner = OwnerId::new();
        f.ledger.ensure_account_sync(owner).unwrap();

        let body = serde_json::to_vec(&checkout_event(Some(owner), "sess_ok", 5)).unwrap();
        let header = sign_payload(SECRET, &body, Utc::now().timestamp());

        let outcome = f.reconciler.handle_signed(&body, &header).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Credited { new_balance: 5 });
    }

    #[tokio::test]
    async fn credit_failure_is_repaired_by_sweep() {
        let f = fixture();
        let owner = OwnerId::new();
        // No account yet: the credit step fails after the record insert.

        let outcome = f
            .reconciler
            .handle_event(checkout_event(Some(owner), "sess_gap", 10))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::RecordedUncredited);
        assert!(f.store.get_sync("sess_gap").unwrap().unwrap().credited_at.is_none());

        // First sweep: account still missing, nothing repaired.
        let report = f.reconciler.run_sweep().await.unwrap();
        assert_eq!(report, SweepReport {
            examined: 1,
            repaired: 0,
        });

        // Owner registers; the next sweep applies the missing credit.
        f.ledger.ensure_account_sync(owner).unwrap();
        let report = f.reconciler.run_sweep().await.unwrap();
        assert_eq!(report, SweepReport {
            examined: 1,
            repaired: 1,
        });
        assert_eq!(f.ledger.get_account_sync(owner).unwrap().balance, 10);

        // Sweep is idempotent once the marker is set.
        let report = f.reconciler.run_sweep().await.unwrap();
        assert_eq!(report, SweepReport {
            examined: 0,
            repaired: 0,
        });
        assert_eq!(f.ledger.get_account_sync(owner).unwrap().balance, 10);
    }

    #[tokio::test]
    async fn guest_purchase_recorded_without_credit() {
        let f = fixture();
        let outcome = f
            .reconciler
            .handle_event(checkout_event(None, "sess_guest", 10))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::GuestRecorded);

        // Guests never show up as sweep work.
        let report = f.reconciler.run_sweep().await.unwrap();
        assert_eq!(report.repaired, 0);
    }

    #[tokio::test]
    async fn failure_callback_corrects_status() {
        let f = fixture();
        let owner = OwnerId::new();
        f.ledger.ensure_account_sync(owner).unwrap();
        f.reconciler
            .handle_event(checkout_event(Some(owner), "sess_fail", 10))
            .await
            .unwrap();

        let outcome = f
            .reconciler
            .handle_event(PaymentEvent {
                kind: PaymentEventKind::PaymentFailed,
                ..checkout_event(None, "sess_fail", 0)
            })
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::StatusCorrected);
        assert_eq!(
            f.store.get_sync("sess_fail").unwrap().unwrap().status,
            PaymentStatus::Failed
        );
    }

    #[tokio::test]
    async fn zero_credit_grant_is_ignored() {
        let f = fixture();
        let outcome = f
            .reconciler
            .handle_event(checkout_event(None, "sess_zero", 0))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Ignored);
        assert!(f.store.get_sync("sess_zero").unwrap().is_none());
    }
}
