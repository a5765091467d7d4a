//! Ledger storage.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use sketchforge_core::OwnerId;

use crate::account::Account;

/// Ledger operation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("account not found: {0}")]
    AccountNotFound(OwnerId),

    /// The caller asked to debit more than the balance it observed. Admission
    /// should have rejected this earlier; surfaced instead of clamping.
    #[error("insufficient balance: have {actual}, requested {requested}")]
    InsufficientBalance { actual: i64, requested: i64 },

    /// Compare-and-swap mismatch: the balance moved between the caller's read
    /// and this write. The caller re-reads and retries its decision.
    #[error("balance changed concurrently: expected {expected}, actual {actual}")]
    Conflict { expected: i64, actual: i64 },

    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(i64),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Authoritative credit-balance keeper.
///
/// `credit` is unconditional (used by the payment reconciler). `debit` only
/// succeeds while the account still holds the balance the caller observed;
/// two jobs admitted against `balance = 1` cannot both debit it.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Create the account if it does not exist yet; returns the current row.
    async fn ensure_account(&self, owner_id: OwnerId) -> Result<Account, LedgerError>;

    async fn get_account(&self, owner_id: OwnerId) -> Result<Account, LedgerError>;

    async fn get_balance(&self, owner_id: OwnerId) -> Result<i64, LedgerError>;

    /// Unconditional increase; returns the new balance.
    async fn credit(&self, owner_id: OwnerId, amount: i64) -> Result<i64, LedgerError>;

    /// Compare-and-swap decrease; succeeds only while the current balance
    /// still equals `expected_balance`. Returns the new balance.
    async fn debit(
        &self,
        owner_id: OwnerId,
        amount: i64,
        expected_balance: i64,
    ) -> Result<i64, LedgerError>;
}

/// In-memory ledger for dev/tests (single-instance wiring).
#[derive(Debug, Default)]
pub struct InMemoryCreditLedger {
    accounts: RwLock<HashMap<OwnerId, Account>>,
}

impl InMemoryCreditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_account_sync(&self, owner_id: OwnerId) -> Result<Account, LedgerError> {
        let mut accounts = self.accounts.write().map_err(poisoned)?;
        let account = accounts
            .entry(owner_id)
            .or_insert_with(|| Account::new(owner_id));
        Ok(account.clone())
    }

    pub fn get_account_sync(&self, owner_id: OwnerId) -> Result<Account, LedgerError> {
        let accounts = self.accounts.read().map_err(poisoned)?;
        accounts
            .get(&owner_id)
            .cloned()
            .ok_or(LedgerError::AccountNotFound(owner_id))
    }

    pub fn credit_sync(&self, owner_id: OwnerId, amount: i64) -> Result<i64, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        let mut accounts = self.accounts.write().map_err(poisoned)?;
        let account = accounts
            .get_mut(&owner_id)
            .ok_or(LedgerError::AccountNotFound(owner_id))?;
        account.balance += amount;
        account.version += 1;
        account.updated_at = Utc::now();
        Ok(account.balance)
    }

    pub fn debit_sync(
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
        let mut accounts = self.accounts.write().map_err(poisoned)?;
        let account = accounts
            .get_mut(&owner_id)
            .ok_or(LedgerError::AccountNotFound(owner_id))?;
        if account.balance != expected_balance {
            return Err(LedgerError::Conflict {
                expected: expected_balance,
                actual: account.balance,
            });
        }
        account.balance -= amount;
        account.version += 1;
        account.updated_at = Utc::now();
        Ok(account.balance)
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> LedgerError {
    LedgerError::Storage("ledger lock poisoned".to_string())
}

#[async_trait]
impl CreditLedger for InMemoryCreditLedger {
    async fn ensure_account(&self, owner_id: OwnerId) -> Result<Account, LedgerError> {
        self.ensure_account_sync(owner_id)
    }

    async fn get_account(&self, owner_id: OwnerId) -> Result<Account, LedgerError> {
        self.get_account_sync(owner_id)
    }

    async fn get_balance(&self, owner_id: OwnerId) -> Result<i64, LedgerError> {
        self.get_account_sync(owner_id).map(|a| a.balance)
    }

    async fn credit(&self, owner_id: OwnerId, amount: i64) -> Result<i64, LedgerError> {
        self.credit_sync(owner_id, amount)
    }

    async fn debit(
        &self,
        owner_id: OwnerId,
        amount: i64,
        expected_balance: i64,
    ) -> Result<i64, LedgerError> {
        self.debit_sync(owner_id, amount, expected_balance)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn funded_ledger(balance: i64) -> (InMemoryCreditLedger, OwnerId) {
        let ledger = InMemoryCreditLedger::new();
        let owner = OwnerId::new();
        ledger.ensure_account_sync(owner).unwrap();
        if balance > 0 {
            ledger.credit_sync(owner, balance).unwrap();
        }
        (ledger, owner)
    }

    #[test]
    fn credit_increases_balance() {
        let (ledger, owner) = funded_ledger(0);
        assert_eq!(ledger.credit_sync(owner, 10).unwrap(), 10);
        assert_eq!(ledger.credit_sync(owner, 5).unwrap(), 15);
    }

    #[test]
    fn debit_requires_matching_observation() {
        let (ledger, owner) = funded_ledger(5);

        assert_eq!(ledger.debit_sync(owner, 1, 5).unwrap(), 4);

        // A second debit against the stale observation is rejected, not
        // applied against the new balance.
        let err = ledger.debit_sync(owner, 1, 5).unwrap_err();
        assert_eq!(err, LedgerError::Conflict {
            expected: 5,
            actual: 4,
        });
        assert_eq!(ledger.get_account_sync(owner).unwrap().balance, 4);
    }

    #[test]
    fn debit_never_exceeds_observed_balance() {
        let (ledger, owner) = funded_ledger(1);
        let err = ledger.debit_sync(owner, 2, 1).unwrap_err();
        assert_eq!(err, LedgerError::InsufficientBalance {
            actual: 1,
            requested: 2,
        });
        assert_eq!(ledger.get_account_sync(owner).unwrap().balance, 1);
    }

    #[test]
    fn exactly_one_debit_wins_per_observation() {
        // Two jobs admitted against balance=1: whichever completes first
        // debits; the other gets a conflict, never a negative balance.
        let (ledger, owner) = funded_ledger(1);

        let first = ledger.debit_sync(owner, 1, 1);
        let second = ledger.debit_sync(owner, 1, 1);

        assert_eq!(first.unwrap(), 0);
        assert!(matches!(second, Err(LedgerError::Conflict { .. })));
        assert_eq!(ledger.get_account_sync(owner).unwrap().balance, 0);
    }

    #[test]
    fn non_positive_amounts_rejected() {
        let (ledger, owner) = funded_ledger(3);
        assert!(matches!(
            ledger.credit_sync(owner, 0),
            Err(LedgerError::NonPositiveAmount(0))
        ));
        assert!(matches!(
            ledger.debit_sync(owner, -1, 3),
            Err(LedgerError::NonPositiveAmount(-1))
        ));
    }

    #[test]
    fn missing_account_is_an_error_not_a_creation() {
        let ledger = InMemoryCreditLedger::new();
        let owner = OwnerId::new();
        assert!(matches!(
            ledger.credit_sync(owner, 5),
            Err(LedgerError::AccountNotFound(_))
        ));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Credit(i64),
        /// Debit against the current balance (a well-behaved caller).
        Debit(i64),
        /// Debit against a stale observation (a racing caller).
        StaleDebit(i64, i64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..100).prop_map(Op::Credit),
            (1i64..100).prop_map(Op::Debit),
            (1i64..100, 0i64..200).prop_map(|(amt, stale)| Op::StaleDebit(amt, stale)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: whatever interleaving of credits, honest debits and
        /// racing stale debits is applied, the balance is never negative.
        #[test]
        fn balance_never_negative(ops in prop::collection::vec(op_strategy(), 1..50)) {
            let (ledger, owner) = funded_ledger(0);

            for op in ops {
                match op {
                    Op::Credit(amount) => {
                        ledger.credit_sync(owner, amount).unwrap();
                    }
                    Op::Debit(amount) => {
                        let balance = ledger.get_account_sync(owner).unwrap().balance;
                        if balance >= amount {
                            ledger.debit_sync(owner, amount, balance).unwrap();
                        } else {
                            prop_assert!(ledger.debit_sync(owner, amount, balance).is_err());
                        }
                    }
                    Op::StaleDebit(amount, stale) => {
                        // May succeed only if the stale observation happens to
                        // match reality; either way the invariant holds below.
                        let _ = ledger.debit_sync(owner, amount, stale);
                    }
                }

                prop_assert!(ledger.get_account_sync(owner).unwrap().balance >= 0);
            }
        }
    }
}
