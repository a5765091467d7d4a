//! `sketchforge-budget` — aggregate spend-ceiling enforcement.
//!
//! The budget governor gates job admission against a configured, time-boxed
//! ceiling on total credit consumption, independent of any single account's
//! balance. Usage is computed by summing [`sketchforge_ledger::UsageEvent`]s
//! inside the active period's window.
//!
//! A failure to compute the aggregate **fails open**: an internal budgeting
//! outage must not block paying users, it is logged loudly instead.

pub mod governor;
pub mod period;
pub mod store;

pub use governor::{BudgetDecision, BudgetGovernor};
pub use period::BudgetPeriod;
pub use store::{BudgetPeriodStore, BudgetStoreError, InMemoryBudgetPeriodStore};
