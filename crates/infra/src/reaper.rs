//! Background sweep for jobs stuck in flight.
//!
//! Jobs that stay `processing` past the timeout never received a terminal
//! signal (crashed worker, lost response). The reaper force-fails them with a
//! **conditional** transition (only if still `processing` at write time), so
//! overlapping sweeps, or a sweep racing a late completion, produce exactly
//! one persisted transition. No credit action is taken: nothing was deducted
//! for an in-flight job.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use sketchforge_core::DomainError;
use sketchforge_events::{ChangeEvent, ChangeNotifier, EntityKind};
use sketchforge_jobs::JobStore;

/// Reaper tuning.
#[derive(Debug, Clone, Copy)]
pub struct ReaperConfig {
    /// Sweep cadence.
    pub interval: Duration,
    /// How long a job may stay `processing` before it is force-failed.
    pub stuck_timeout: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            stuck_timeout: Duration::from_secs(10 * 60),
        }
    }
}

/// Periodic stuck-job sweep.
#[derive(Clone)]
pub struct StuckJobReaper {
    jobs: Arc<dyn JobStore>,
    notifier: ChangeNotifier,
    config: ReaperConfig,
}

impl StuckJobReaper {
    pub fn new(jobs: Arc<dyn JobStore>, notifier: ChangeNotifier, config: ReaperConfig) -> Self {
        Self {
            jobs,
            notifier,
            config,
        }
    }

    /// One sweep. Returns how many jobs this call transitioned (losers of the
    /// conditional update are not counted and not notified).
    pub async fn run_once(&self) -> Result<usize, DomainError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.stuck_timeout)
                .map_err(|e| DomainError::validation(e.to_string()))?;

        let stale = self
            .jobs
            .list_stale(cutoff)
            .await
            .map_err(|e| DomainError::storage(e.to_string()))?;

        let mut reaped = 0usize;
        for job in stale {
            match self
                .jobs
                .fail(job.id, "processing timed out".to_string())
                .await
            {
                Ok(Some(updated)) => {
                    reaped += 1;
                    info!(job_id = %updated.id, owner_id = %updated.owner_id, "stuck job reaped");
                    // One notification per transitioned job so the owner can
                    // retry it.
                    self.notifier.publish(ChangeEvent::new(
                        updated.owner_id,
                        EntityKind::Job,
                        *updated.id.as_uuid(),
                        Some(updated.status.as_str().to_string()),
                        updated.updated_at,
                        json!({
                            "id": updated.id,
                            "status": updated.status,
                            "error": updated.error,
                            "reaped": true,
                        }),
                    ));
                }
                Ok(None) => {
                    // Lost to a concurrent sweep or a late terminal signal.
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "failed to reap stuck job");
                }
            }
        }

        Ok(reaped)
    }

    /// Run the sweep on a fixed interval until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(0) => {}
                    Ok(reaped) => info!(reaped, "reaper sweep transitioned stuck jobs"),
                    Err(e) => error!(error = %e, "reaper sweep failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use sketchforge_core::{OwnerId, Style};
    use sketchforge_jobs::{InMemoryJobStore, Job, JobStatus};

    use super::*;

    fn reaper_over(jobs: Arc<InMemoryJobStore>, notifier: ChangeNotifier) -> StuckJobReaper {
        StuckJobReaper::new(jobs, notifier, ReaperConfig {
            interval: Duration::from_secs(60),
            stuck_timeout: Duration::from_secs(600),
        })
    }

    fn stuck_job(store: &InMemoryJobStore, owner: OwnerId) -> Job {
        let mut job = Job::new(owner, Style::Cartoon, "AAAA");
        job.updated_at = Utc::now() - ChronoDuration::minutes(11);
        store.insert_sync(job.clone()).unwrap();
        job
    }

    #[tokio::test]
    async fn reaps_only_past_timeout() {
        let jobs = Arc::new(InMemoryJobStore::new());
        let notifier = ChangeNotifier::new(16);
        let owner = OwnerId::new();

        let stuck = stuck_job(&jobs, owner);
        let fresh = Job::new(owner, Style::Pixar, "BBBB");
        jobs.insert_sync(fresh.clone()).unwrap();

        let reaper = reaper_over(jobs.clone(), notifier);
        assert_eq!(reaper.run_once().await.unwrap(), 1);

        assert_eq!(
            jobs.get_sync(owner, stuck.id).unwrap().unwrap().status,
            JobStatus::Failed
        );
        assert_eq!(
            jobs.get_sync(owner, fresh.id).unwrap().unwrap().status,
            JobStatus::Processing
        );
    }

    #[tokio::test]
    async fn overlapping_sweeps_reap_exactly_once() {
        let jobs = Arc::new(InMemoryJobStore::new());
        let notifier = ChangeNotifier::new(16);
        let owner = OwnerId::new();
        stuck_job(&jobs, owner);

        let reaper = reaper_over(jobs.clone(), notifier.clone());
        let mut sub = notifier.subscribe_owner(owner);

        let (a, b) = tokio::join!(reaper.run_once(), reaper.run_once());
        assert_eq!(a.unwrap() + b.unwrap(), 1);

        // Exactly one notification for the single transition.
        let mut notifications = 0;
        while let Ok(Some(event)) = sub.try_recv() {
            assert_eq!(event.status(), Some("failed"));
            notifications += 1;
        }
        assert_eq!(notifications, 1);
    }

    #[tokio::test]
    async fn reaped_job_can_be_retried_and_complete() {
        // Stuck at t=0, reaped past the timeout, owner retries, job then
        // completes normally.
        let jobs = Arc::new(InMemoryJobStore::new());
        let notifier = ChangeNotifier::new(16);
        let owner = OwnerId::new();
        let job = stuck_job(&jobs, owner);

        let reaper = reaper_over(jobs.clone(), notifier);
        assert_eq!(reaper.run_once().await.unwrap(), 1);

        let retried = jobs.begin_retry(owner, job.id).await.unwrap().unwrap();
        assert_eq!(retried.status, JobStatus::Processing);

        let done = jobs
            .complete(job.id, "out.png".to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn second_sweep_after_reap_is_a_noop() {
        let jobs = Arc::new(InMemoryJobStore::new());
        let notifier = ChangeNotifier::new(16);
        stuck_job(&jobs, OwnerId::new());

        let reaper = reaper_over(jobs.clone(), notifier);
        assert_eq!(reaper.run_once().await.unwrap(), 1);
        assert_eq!(reaper.run_once().await.unwrap(), 0);
    }
}
