//! The paid transformation state machine.
//!
//! Admission (rate limit → budget → balance snapshot) happens before any
//! external call; the snapshot becomes the `expected_balance` for the CAS
//! debit after success. **Credits are deducted only after confirmed
//! success**, never speculatively, never refunded, because none was taken
//! on failure.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info, warn};

use sketchforge_budget::BudgetGovernor;
use sketchforge_core::{DomainError, JobId, OwnerId, Style};
use sketchforge_events::{ChangeEvent, ChangeNotifier, EntityKind};
use sketchforge_jobs::{
    Job, JobStore, JobStoreError, RateLimitDecision, RateLimiter, RetryPolicy,
};
use sketchforge_ledger::{CreditLedger, LedgerError, UsageEvent, UsageLog};
use sketchforge_transform::{validate_image_data, TransformClient, TransformRequest};

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Credits consumed per completed job.
    pub credits_per_job: i64,
    /// Bounded retry for persisting a job outcome over a flaky store.
    pub storage_retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            credits_per_job: 1,
            storage_retry: RetryPolicy::default(),
        }
    }
}

/// Runs jobs through admission, the external transform, and settlement.
#[derive(Clone)]
pub struct JobOrchestrator {
    ledger: Arc<dyn CreditLedger>,
    usage: Arc<dyn UsageLog>,
    jobs: Arc<dyn JobStore>,
    transform: Arc<dyn TransformClient>,
    rate_limiter: Arc<dyn RateLimiter>,
    budget: BudgetGovernor,
    notifier: ChangeNotifier,
    config: OrchestratorConfig,
}

impl JobOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<dyn CreditLedger>,
        usage: Arc<dyn UsageLog>,
        jobs: Arc<dyn JobStore>,
        transform: Arc<dyn TransformClient>,
        rate_limiter: Arc<dyn RateLimiter>,
        budget: BudgetGovernor,
        notifier: ChangeNotifier,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            ledger,
            usage,
            jobs,
            transform,
            rate_limiter,
            budget,
            notifier,
            config,
        }
    }

    /// Submit new work. On success the job is persisted as `processing` and
    /// execution continues in a background task; the returned job is the
    /// caller's receipt.
    pub async fn submit(
        &self,
        owner_id: OwnerId,
        image_data: String,
        style: Style,
    ) -> Result<Job, DomainError> {
        validate_image_data(&image_data)?;

        let expected_balance = self.admit(owner_id).await?;

        let job = Job::new(owner_id, style, image_data);
        self.jobs
            .insert(job.clone())
            .await
            .map_err(job_store_error)?;
        self.publish_job(&job);

        info!(job_id = %job.id, owner_id = %owner_id, style = %style, "job admitted");
        self.spawn_execution(job.clone(), expected_balance);
        Ok(job)
    }

    /// Explicit retry of a failed job: back to `processing` through the state
    /// machine, then re-enter admission and execution from the top: balance,
    /// budget and rate windows may all have changed since the failure.
    pub async fn retry(&self, owner_id: OwnerId, job_id: JobId) -> Result<Job, DomainError> {
        // Fresh admission before touching the job, so a rejected retry leaves
        // the failed state untouched.
        let expected_balance = self.admit(owner_id).await?;

        let job = match self.jobs.begin_retry(owner_id, job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                return Err(DomainError::conflict("job is not in a retryable state"));
            }
            Err(e) => return Err(job_store_error(e)),
        };
        self.publish_job(&job);

        info!(job_id = %job.id, owner_id = %owner_id, "job retry admitted");
        self.spawn_execution(job.clone(), expected_balance);
        Ok(job)
    }

    /// Admission checks in order: rate limit, budget, balance. The returned
    /// balance is the CAS snapshot for the eventual debit.
    async fn admit(&self, owner_id: OwnerId) -> Result<i64, DomainError> {
        match self.rate_limiter.check(owner_id).await {
            Ok(RateLimitDecision::Allowed) => {}
            Ok(RateLimitDecision::Limited { retry_after }) => {
                return Err(DomainError::rate_limited(retry_after.as_secs().max(1)));
            }
            Err(e) => {
                // Shared-counter outage: fail open rather than block paying
                // users on an internal fault.
                warn!(error = %e, "rate limiter unavailable, admitting");
            }
        }

        let decision = self.budget.allow(self.config.credits_per_job).await;
        if !decision.allowed {
            info!(owner_id = %owner_id, ?decision, "admission blocked by budget");
            return Err(DomainError::InsufficientBudget);
        }

        let account = match self.ledger.ensure_account(owner_id).await {
            Ok(account) => account,
            Err(e) => return Err(ledger_error(e)),
        };
        if account.balance < self.config.credits_per_job {
            return Err(DomainError::InsufficientCredits);
        }
        Ok(account.balance)
    }

    fn spawn_execution(&self, job: Job, expected_balance: i64) {
        let this = self.clone();
        tokio::spawn(async move {
            this.run_job(job, expected_balance).await;
        });
    }

    /// Execute one admitted job to a terminal state. Public so tests and
    /// synchronous callers can drive a job without the spawn.
    pub async fn run_job(&self, job: Job, expected_balance: i64) {
        let request = TransformRequest {
            image_data: job.input_ref.clone(),
            style: job.style,
        };

        let output = match self.transform.transform(&request).await {
            Ok(output) => Some(output),
            Err(primary) => {
                // Exactly one fallback attempt on the cheaper path.
                warn!(job_id = %job.id, error = %primary, "primary transform failed, trying fallback");
                match self.transform.transform_direct(&request).await {
                    Ok(output) => Some(output),
                    Err(fallback) => {
                        error!(
                            job_id = %job.id,
                            primary = %primary,
                            fallback = %fallback,
                            "transform and fallback both failed"
                        );
                        self.settle_failure(&job, format!("{primary}; fallback: {fallback}"))
                            .await;
                        None
                    }
                }
            }
        };

        if let Some(output) = output {
            self.settle_success(&job, output.image_ref, expected_balance)
                .await;
        }
    }

    /// Persist a successful outcome, then debit. The debit is a CAS against
    /// the admission-time snapshot; a conflict never rolls back the delivered
    /// result; it is logged as a reconciliation item.
    async fn settle_success(&self, job: &Job, output_ref: String, expected_balance: i64) {
        let updated = match self
            .with_storage_retry(|| self.jobs.complete(job.id, output_ref.clone()))
            .await
        {
            Ok(Some(updated)) => updated,
            Ok(None) => {
                // A concurrent writer (the reaper) won; exactly one transition
                // is persisted, so the late result is dropped and no credit
                // is taken.
                warn!(job_id = %job.id, "completion lost the status race, result discarded");
                return;
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "failed to persist completion; reaper will recover");
                return;
            }
        };
        self.publish_job(&updated);

        match self
            .ledger
            .debit(job.owner_id, self.config.credits_per_job, expected_balance)
            .await
        {
            Ok(new_balance) => {
                debug!(job_id = %job.id, new_balance, "credit deducted after success");
                if let Err(e) = self
                    .usage
                    .append(UsageEvent::for_job(
                        job.owner_id,
                        job.id,
                        self.config.credits_per_job,
                    ))
                    .await
                {
                    error!(job_id = %job.id, error = %e, "usage event append failed");
                }
                self.publish_account(job.owner_id, new_balance);
            }
            Err(LedgerError::Conflict { expected, actual }) => {
                // The job already completed and the result is delivered;
                // the missed deduction is a billing reconciliation item.
                error!(
                    job_id = %job.id,
                    owner_id = %job.owner_id,
                    expected,
                    actual,
                    "post-success debit hit a concurrency conflict; logged for reconciliation"
                );
            }
            Err(e) => {
                error!(
                    job_id = %job.id,
                    owner_id = %job.owner_id,
                    error = %e,
                    "post-success debit failed; logged for reconciliation"
                );
            }
        }
    }

    /// Persist a failure. The balance is untouched: nothing was deducted for
    /// the in-flight job.
    async fn settle_failure(&self, job: &Job, reason: String) {
        match self
            .with_storage_retry(|| self.jobs.fail(job.id, reason.clone()))
            .await
        {
            Ok(Some(updated)) => self.publish_job(&updated),
            Ok(None) => {
                warn!(job_id = %job.id, "failure lost the status race");
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "failed to persist failure; reaper will recover");
            }
        }
    }

    /// Bounded retry over a transient-failure-prone store operation.
    async fn with_storage_retry<F, Fut, T>(&self, mut op: F) -> Result<T, JobStoreError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, JobStoreError>>,
    {
        let policy = self.config.storage_retry;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(JobStoreError::Storage(msg)) if policy.should_retry(attempt) => {
                    warn!(attempt, error = %msg, "storage error, backing off before retry");
                    tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn publish_job(&self, job: &Job) {
        self.notifier.publish(ChangeEvent::new(
            job.owner_id,
            EntityKind::Job,
            *job.id.as_uuid(),
            Some(job.status.as_str().to_string()),
            job.updated_at,
            json!({
                "id": job.id,
                "status": job.status,
                "output_ref": job.output_ref,
                "error": job.error,
                "unseen": job.unseen,
            }),
        ));
    }

    fn publish_account(&self, owner_id: OwnerId, balance: i64) {
        self.notifier.publish(ChangeEvent::new(
            owner_id,
            EntityKind::Account,
            *owner_id.as_uuid(),
            None,
            chrono::Utc::now(),
            json!({ "balance": balance }),
        ));
    }
}

fn ledger_error(error: LedgerError) -> DomainError {
    match error {
        LedgerError::AccountNotFound(_) => DomainError::InsufficientCredits,
        LedgerError::InsufficientBalance { .. } => DomainError::InsufficientCredits,
        LedgerError::Conflict { expected, actual } => DomainError::conflict(format!(
            "balance moved from {expected} to {actual}"
        )),
        LedgerError::NonPositiveAmount(n) => {
            DomainError::validation(format!("amount must be positive, got {n}"))
        }
        LedgerError::Storage(msg) => DomainError::storage(msg),
    }
}

fn job_store_error(error: JobStoreError) -> DomainError {
    match error {
        JobStoreError::NotFound(_) => DomainError::NotFound,
        JobStoreError::OwnerIsolation => DomainError::Auth,
        JobStoreError::AlreadyExists(id) => {
            DomainError::conflict(format!("job already exists: {id}"))
        }
        JobStoreError::Storage(msg) => DomainError::storage(msg),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use sketchforge_budget::{BudgetPeriod, InMemoryBudgetPeriodStore};
    use sketchforge_core::BudgetPeriodId;
    use sketchforge_jobs::{FixedWindowRateLimiter, InMemoryJobStore, JobStatus};
    use sketchforge_ledger::{InMemoryCreditLedger, InMemoryUsageLog};
    use sketchforge_transform::{TransformError, TransformOutput};

    use super::*;

    /// Scripted transform double: a queue of outcomes per path.
    #[derive(Default)]
    struct ScriptedTransform {
        fail_primary: std::sync::atomic::AtomicBool,
        fail_direct: std::sync::atomic::AtomicBool,
        primary_calls: AtomicUsize,
        direct_calls: AtomicUsize,
    }

    impl ScriptedTransform {
        fn output() -> TransformOutput {
            TransformOutput {
                image_ref: "data:image/png;base64,UE5H".to_string(),
            }
        }

        fn set_fail_primary(&self, fail: bool) {
            self.fail_primary.store(fail, Ordering::SeqCst);
        }

        fn set_fail_direct(&self, fail: bool) {
            self.fail_direct.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl TransformClient for ScriptedTransform {
        async fn transform(
            &self,
            _request: &TransformRequest,
        ) -> Result<TransformOutput, TransformError> {
            self.primary_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_primary.load(Ordering::SeqCst) {
                Err(TransformError::Api {
                    status: 500,
                    message: "upstream unavailable".to_string(),
                })
            } else {
                Ok(Self::output())
            }
        }

        async fn transform_direct(
            &self,
            _request: &TransformRequest,
        ) -> Result<TransformOutput, TransformError> {
            self.direct_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_direct.load(Ordering::SeqCst) {
                Err(TransformError::Timeout)
            } else {
                Ok(Self::output())
            }
        }
    }

    struct Fixture {
        orchestrator: JobOrchestrator,
        ledger: Arc<InMemoryCreditLedger>,
        usage: Arc<InMemoryUsageLog>,
        jobs: Arc<InMemoryJobStore>,
        transform: Arc<ScriptedTransform>,
        notifier: ChangeNotifier,
        owner: OwnerId,
    }

    fn fixture_with(
        balance: i64,
        rate_limit: u32,
        budget_period: Option<BudgetPeriod>,
    ) -> Fixture {
        let ledger = Arc::new(InMemoryCreditLedger::new());
        let usage = Arc::new(InMemoryUsageLog::new());
        let jobs = Arc::new(InMemoryJobStore::new());
        let transform = Arc::new(ScriptedTransform::default());
        let notifier = ChangeNotifier::new(64);

        let owner = OwnerId::new();
        ledger.ensure_account_sync(owner).unwrap();
        if balance > 0 {
            ledger.credit_sync(owner, balance).unwrap();
        }

        let periods = Arc::new(InMemoryBudgetPeriodStore::new());
        if let Some(period) = budget_period {
            periods.insert_sync(period).unwrap();
        }
        let budget = BudgetGovernor::new(periods, usage.clone());

        let orchestrator = JobOrchestrator::new(
            ledger.clone(),
            usage.clone(),
            jobs.clone(),
            transform.clone(),
            Arc::new(FixedWindowRateLimiter::new(
                rate_limit,
                Duration::from_secs(60),
            )),
            budget,
            notifier.clone(),
            OrchestratorConfig {
                credits_per_job: 1,
                storage_retry: RetryPolicy::fixed(2, Duration::from_millis(1)),
            },
        );

        Fixture {
            orchestrator,
            ledger,
            usage,
            jobs,
            transform,
            notifier,
            owner,
        }
    }

    fn fixture(balance: i64) -> Fixture {
        fixture_with(balance, 100, None)
    }

    async fn wait_terminal(f: &Fixture, job_id: JobId) -> Job {
        for _ in 0..500 {
            let job = f.jobs.get_sync(f.owner, job_id).unwrap().unwrap();
            if job.status != JobStatus::Processing {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("job never reached a terminal state");
    }

    const IMAGE: &str = "iVBORw0KGgoAAAANSUhEUg==";

    #[tokio::test]
    async fn success_then_failure_deducts_exactly_once() {
        // Scenario: balance=5, first job succeeds -> 4; second job fails ->
        // still 4 (credits deduct only on success, no refunds needed).
        let f = fixture(5);

        let job = f
            .orchestrator
            .submit(f.owner, IMAGE.to_string(), Style::Cartoon)
            .await
            .unwrap();
        let done = wait_terminal(&f, job.id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.output_ref.is_some());
        assert_eq!(f.ledger.get_account_sync(f.owner).unwrap().balance, 4);

        f.transform.set_fail_primary(true);
        f.transform.set_fail_direct(true);
        let job = f
            .orchestrator
            .submit(f.owner, IMAGE.to_string(), Style::Pixar)
            .await
            .unwrap();
        let done = wait_terminal(&f, job.id).await;
        assert_eq!(done.status, JobStatus::Failed);
        assert!(done.error.is_some());
        assert_eq!(f.ledger.get_account_sync(f.owner).unwrap().balance, 4);

        // One usage event for the one completed job.
        assert_eq!(f.usage.list_for_owner(f.owner).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fallback_runs_exactly_once_and_can_rescue() {
        let f = fixture(2);
        f.transform.set_fail_primary(true);

        let job = f
            .orchestrator
            .submit(f.owner, IMAGE.to_string(), Style::Realistic)
            .await
            .unwrap();
        let done = wait_terminal(&f, job.id).await;

        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(f.transform.primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.transform.direct_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.ledger.get_account_sync(f.owner).unwrap().balance, 1);
    }

    #[tokio::test]
    async fn both_paths_failing_tries_fallback_only_once() {
        let f = fixture(2);
        f.transform.set_fail_primary(true);
        f.transform.set_fail_direct(true);

        let job = f
            .orchestrator
            .submit(f.owner, IMAGE.to_string(), Style::Cartoon)
            .await
            .unwrap();
        wait_terminal(&f, job.id).await;

        assert_eq!(f.transform.primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.transform.direct_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_balance_is_rejected_before_any_call() {
        let f = fixture(0);
        let err = f
            .orchestrator
            .submit(f.owner, IMAGE.to_string(), Style::Cartoon)
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::InsufficientCredits);
        assert_eq!(f.transform.primary_calls.load(Ordering::SeqCst), 0);
        assert!(f.jobs.list_for_owner(f.owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_image_rejected_before_admission() {
        let f = fixture(5);
        let err = f
            .orchestrator
            .submit(f.owner, "not base64!".to_string(), Style::Cartoon)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn rate_limit_rejects_with_retry_after() {
        let f = fixture_with(5, 1, None);

        f.orchestrator
            .submit(f.owner, IMAGE.to_string(), Style::Cartoon)
            .await
            .unwrap();

        let err = f
            .orchestrator
            .submit(f.owner, IMAGE.to_string(), Style::Cartoon)
            .await
            .unwrap_err();
        match err {
            DomainError::RateLimited { retry_after_secs } => assert!(retry_after_secs >= 1),
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exhausted_hard_budget_blocks_even_with_balance() {
        // Scenario: hard_limit_enabled, total_limit=100, 100 already used ->
        // rejected with InsufficientBudget despite a positive balance.
        let now = chrono::Utc::now();
        let period = BudgetPeriod {
            id: BudgetPeriodId::new(),
            name: "month".to_string(),
            total_limit: 100,
            period_start: now - chrono::Duration::days(1),
            period_end: now + chrono::Duration::days(29),
            alert_threshold: 0.8,
            hard_limit_enabled: true,
        };
        let f = fixture_with(50, 100, Some(period));
        for _ in 0..100 {
            f.usage
                .append_sync(UsageEvent::for_job(OwnerId::new(), JobId::new(), 1))
                .unwrap();
        }

        let err = f
            .orchestrator
            .submit(f.owner, IMAGE.to_string(), Style::Cartoon)
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::InsufficientBudget);
    }

    #[tokio::test]
    async fn duplicate_success_signals_debit_at_most_once() {
        let f = fixture(5);

        let job = f
            .orchestrator
            .submit(f.owner, IMAGE.to_string(), Style::Cartoon)
            .await
            .unwrap();
        let done = wait_terminal(&f, job.id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(f.ledger.get_account_sync(f.owner).unwrap().balance, 4);

        // A duplicate "job succeeded" signal loses the conditional completion
        // and must not debit again.
        f.orchestrator.run_job(job.clone(), 5).await;
        assert_eq!(f.ledger.get_account_sync(f.owner).unwrap().balance, 4);
        assert_eq!(f.usage.list_for_owner(f.owner).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn billing_race_never_rolls_back_a_delivered_result() {
        let f = fixture(5);

        // Job admitted against balance=5…
        let job = Job::new(f.owner, Style::Cartoon, IMAGE);
        f.jobs.insert_sync(job.clone()).unwrap();

        // …but a webhook credit lands mid-flight, invalidating the snapshot.
        f.ledger.credit_sync(f.owner, 10).unwrap();

        f.orchestrator.run_job(job.clone(), 5).await;

        let done = f.jobs.get_sync(f.owner, job.id).unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        // The conflicting debit was not applied; balance reflects the credit
        // only and the gap is a reconciliation item.
        assert_eq!(f.ledger.get_account_sync(f.owner).unwrap().balance, 15);
        assert!(f.usage.list_for_owner(f.owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn retry_reenters_admission_and_completes() {
        let f = fixture(3);
        f.transform.set_fail_primary(true);
        f.transform.set_fail_direct(true);

        let job = f
            .orchestrator
            .submit(f.owner, IMAGE.to_string(), Style::Cartoon)
            .await
            .unwrap();
        let failed = wait_terminal(&f, job.id).await;
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(f.ledger.get_account_sync(f.owner).unwrap().balance, 3);

        // Service recovers; the explicit retry succeeds end to end.
        f.transform.set_fail_primary(false);
        f.transform.set_fail_direct(false);
        let retried = f.orchestrator.retry(f.owner, job.id).await.unwrap();
        assert_eq!(retried.status, JobStatus::Processing);

        let done = wait_terminal(&f, job.id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(f.ledger.get_account_sync(f.owner).unwrap().balance, 2);
    }

    #[tokio::test]
    async fn retry_of_processing_job_is_a_conflict() {
        let f = fixture(3);
        let job = Job::new(f.owner, Style::Cartoon, IMAGE);
        f.jobs.insert_sync(job.clone()).unwrap();

        let err = f.orchestrator.retry(f.owner, job.id).await.unwrap_err();
        assert!(matches!(err, DomainError::ConcurrencyConflict(_)));
    }

    #[tokio::test]
    async fn completion_publishes_owner_scoped_events() {
        let f = fixture(2);
        let mut sub = f.notifier.subscribe_owner(f.owner);

        let job = f
            .orchestrator
            .submit(f.owner, IMAGE.to_string(), Style::Cartoon)
            .await
            .unwrap();
        wait_terminal(&f, job.id).await;

        let mut topics = Vec::new();
        while let Ok(Some(event)) = sub.try_recv() {
            topics.push(event.topic());
        }
        assert!(topics.contains(&"job.processing".to_string()));
        assert!(topics.contains(&"job.completed".to_string()));
        assert!(topics.contains(&"account.updated".to_string()));
    }
}
