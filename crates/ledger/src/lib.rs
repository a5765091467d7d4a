//! `sketchforge-ledger` — single source of truth for credit balances.
//!
//! The ledger exposes atomic credit/debit with optimistic concurrency:
//! `debit` is a compare-and-swap against a balance the caller observed at
//! admission time, because admission and the debit that follows it are
//! separated by a slow external call. A stale observation fails with a
//! conflict instead of silently clamping, so balances can never go negative.

pub mod account;
pub mod store;
pub mod usage;

pub use account::Account;
pub use store::{CreditLedger, InMemoryCreditLedger, LedgerError};
pub use usage::{InMemoryUsageLog, UsageEvent, UsageLog};
