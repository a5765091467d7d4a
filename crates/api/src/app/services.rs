//! Infrastructure wiring: stores, orchestrator, background workers.

use std::sync::Arc;

use sketchforge_budget::{BudgetGovernor, BudgetPeriodStore, InMemoryBudgetPeriodStore};
use sketchforge_events::ChangeNotifier;
use sketchforge_infra::workers::spawn_reconciliation_worker;
use sketchforge_infra::{JobOrchestrator, OrchestratorConfig, StuckJobReaper};
use sketchforge_jobs::{FixedWindowRateLimiter, InMemoryJobStore, JobStore, RateLimiter};
use sketchforge_ledger::{CreditLedger, InMemoryCreditLedger, InMemoryUsageLog, UsageLog};
use sketchforge_payments::{InMemoryPaymentStore, PaymentReconciler, PaymentStore};
use sketchforge_transform::{AnalysisCache, HttpTransformClient, InMemoryAnalysisCache};

use crate::config::ApiConfig;

/// Shared service handles for the HTTP layer.
#[derive(Clone)]
pub struct AppServices {
    pub orchestrator: JobOrchestrator,
    pub ledger: Arc<dyn CreditLedger>,
    pub usage: Arc<dyn UsageLog>,
    pub jobs: Arc<dyn JobStore>,
    pub reconciler: PaymentReconciler,
    pub budget_periods: Arc<dyn BudgetPeriodStore>,
    pub notifier: ChangeNotifier,
}

/// Build services from configuration.
///
/// Default wiring is in-memory (dev/tests, single instance). With the
/// `postgres`/`redis` features and the matching URLs set, stores and rate
/// limiting move to shared backends.
pub async fn build_services(config: &ApiConfig) -> anyhow::Result<AppServices> {
    #[cfg(feature = "postgres")]
    if let Some(database_url) = &config.database_url {
        return build_persistent_services(config, database_url).await;
    }
    #[cfg(not(feature = "postgres"))]
    if config.database_url.is_some() {
        tracing::warn!(
            "DATABASE_URL set but the postgres feature is not enabled, using in-memory stores"
        );
    }

    let ledger: Arc<dyn CreditLedger> = Arc::new(InMemoryCreditLedger::new());
    let usage: Arc<dyn UsageLog> = Arc::new(InMemoryUsageLog::new());
    let jobs: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let payments: Arc<dyn PaymentStore> = Arc::new(InMemoryPaymentStore::new());
    let budget_periods: Arc<dyn BudgetPeriodStore> = Arc::new(InMemoryBudgetPeriodStore::new());

    finish_wiring(config, ledger, usage, jobs, payments, budget_periods)
}

#[cfg(feature = "postgres")]
async fn build_persistent_services(
    config: &ApiConfig,
    database_url: &str,
) -> anyhow::Result<AppServices> {
    use sketchforge_infra::postgres::{
        ensure_schema, PostgresBudgetPeriodStore, PostgresCreditLedger, PostgresJobStore,
        PostgresPaymentStore, PostgresUsageLog,
    };

    let pool = sqlx::PgPool::connect(database_url).await?;
    ensure_schema(&pool).await?;

    let ledger: Arc<dyn CreditLedger> = Arc::new(PostgresCreditLedger::new(pool.clone()));
    let usage: Arc<dyn UsageLog> = Arc::new(PostgresUsageLog::new(pool.clone()));
    let jobs: Arc<dyn JobStore> = Arc::new(PostgresJobStore::new(pool.clone()));
    let payments: Arc<dyn PaymentStore> = Arc::new(PostgresPaymentStore::new(pool.clone()));
    let budget_periods: Arc<dyn BudgetPeriodStore> =
        Arc::new(PostgresBudgetPeriodStore::new(pool));

    finish_wiring(config, ledger, usage, jobs, payments, budget_periods)
}

fn finish_wiring(
    config: &ApiConfig,
    ledger: Arc<dyn CreditLedger>,
    usage: Arc<dyn UsageLog>,
    jobs: Arc<dyn JobStore>,
    payments: Arc<dyn PaymentStore>,
    budget_periods: Arc<dyn BudgetPeriodStore>,
) -> anyhow::Result<AppServices> {
    let notifier = ChangeNotifier::new(256);

    let transform = Arc::new(
        HttpTransformClient::new(config.transform.clone())?.with_cache(build_analysis_cache(config)),
    );
    let rate_limiter = build_rate_limiter(config)?;
    let budget = BudgetGovernor::new(budget_periods.clone(), usage.clone());

    let orchestrator = JobOrchestrator::new(
        ledger.clone(),
        usage.clone(),
        jobs.clone(),
        transform,
        rate_limiter,
        budget,
        notifier.clone(),
        OrchestratorConfig {
            credits_per_job: config.credits_per_job,
            ..OrchestratorConfig::default()
        },
    );

    let reconciler = PaymentReconciler::new(
        payments,
        ledger.clone(),
        config.webhook_secret.clone().into_bytes(),
    );

    // Background tasks: stuck-job sweep and payment repair. Detached; they
    // run for the life of the process.
    StuckJobReaper::new(jobs.clone(), notifier.clone(), config.reaper).spawn();
    spawn_reconciliation_worker(reconciler.clone(), config.reconcile_interval);

    Ok(AppServices {
        orchestrator,
        ledger,
        usage,
        jobs,
        reconciler,
        budget_periods,
        notifier,
    })
}

fn build_analysis_cache(config: &ApiConfig) -> Arc<dyn AnalysisCache> {
    #[cfg(feature = "redis")]
    if let Some(redis_url) = &config.redis_url {
        match sketchforge_infra::redis_cache::RedisAnalysisCache::new(
            redis_url,
            std::time::Duration::from_secs(5 * 60),
        ) {
            Ok(cache) => return Arc::new(cache),
            Err(e) => {
                tracing::warn!(error = %e, "redis analysis cache unavailable, using in-process cache");
            }
        }
    }
    #[cfg(not(feature = "redis"))]
    let _ = config;
    Arc::new(InMemoryAnalysisCache::default())
}

fn build_rate_limiter(config: &ApiConfig) -> anyhow::Result<Arc<dyn RateLimiter>> {
    #[cfg(feature = "redis")]
    if let Some(redis_url) = &config.redis_url {
        let limiter = sketchforge_infra::redis_rate_limit::RedisRateLimiter::new(
            redis_url,
            config.rate_limit,
            config.rate_window,
        )
        .map_err(|e| anyhow::anyhow!("redis rate limiter: {e}"))?;
        return Ok(Arc::new(limiter));
    }
    #[cfg(not(feature = "redis"))]
    if config.redis_url.is_some() {
        tracing::warn!(
            "REDIS_URL set but the redis feature is not enabled, using in-process rate limiting"
        );
    }

    Ok(Arc::new(FixedWindowRateLimiter::new(
        config.rate_limit,
        config.rate_window,
    )))
}
