//! Recurring background workers.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

use sketchforge_payments::PaymentReconciler;

/// Periodically repair recorded-but-uncredited payments.
pub fn spawn_reconciliation_worker(
    reconciler: PaymentReconciler,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match reconciler.run_sweep().await {
                Ok(report) if report.repaired > 0 => {
                    info!(
                        examined = report.examined,
                        repaired = report.repaired,
                        "payment reconciliation sweep repaired credits"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "payment reconciliation sweep failed"),
            }
        }
    })
}
