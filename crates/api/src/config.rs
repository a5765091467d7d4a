//! Environment-driven configuration, read once at startup.

use std::time::Duration;

use sketchforge_core::OwnerId;
use sketchforge_infra::ReaperConfig;
use sketchforge_transform::HttpTransformConfig;

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
    /// Secret for bearer-token verification.
    pub auth_secret: String,
    /// Secret for payment webhook signatures.
    pub webhook_secret: String,
    /// Owner allowed to use the admin budget surface.
    pub admin_owner: Option<OwnerId>,
    pub transform: HttpTransformConfig,
    /// Fixed-window rate limit per actor.
    pub rate_limit: u32,
    pub rate_window: Duration,
    pub reaper: ReaperConfig,
    /// Cadence of the payment reconciliation sweep.
    pub reconcile_interval: Duration,
    pub credits_per_job: i64,
    /// When set (and the `postgres` feature is on), stores are Postgres-backed.
    pub database_url: Option<String>,
    /// When set (and the `redis` feature is on), rate limiting uses shared counters.
    pub redis_url: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            auth_secret: "dev-secret".to_string(),
            webhook_secret: "dev-webhook-secret".to_string(),
            admin_owner: None,
            transform: HttpTransformConfig::default(),
            rate_limit: 5,
            rate_window: Duration::from_secs(60),
            reaper: ReaperConfig::default(),
            reconcile_interval: Duration::from_secs(300),
            credits_per_job: 1,
            database_url: None,
            redis_url: None,
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mut transform = HttpTransformConfig::default();
        if let Ok(url) = std::env::var("TRANSFORM_BASE_URL") {
            transform.base_url = url;
        }
        if let Ok(key) = std::env::var("TRANSFORM_API_KEY") {
            transform.api_key = key;
        } else {
            tracing::warn!("TRANSFORM_API_KEY not set; transform calls will be rejected upstream");
        }
        if let Some(secs) = env_u64("TRANSFORM_TIMEOUT_SECS") {
            transform.timeout = Duration::from_secs(secs);
        }

        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            auth_secret: std::env::var("AUTH_SECRET").unwrap_or_else(|_| {
                tracing::warn!("AUTH_SECRET not set; using insecure dev default");
                defaults.auth_secret
            }),
            webhook_secret: std::env::var("WEBHOOK_SECRET").unwrap_or_else(|_| {
                tracing::warn!("WEBHOOK_SECRET not set; using insecure dev default");
                defaults.webhook_secret
            }),
            admin_owner: std::env::var("ADMIN_OWNER_ID")
                .ok()
                .and_then(|s| s.parse().ok()),
            transform,
            rate_limit: env_u64("RATE_LIMIT").map_or(defaults.rate_limit, |v| v as u32),
            rate_window: env_u64("RATE_WINDOW_SECS")
                .map_or(defaults.rate_window, Duration::from_secs),
            reaper: ReaperConfig {
                interval: env_u64("REAPER_INTERVAL_SECS")
                    .map_or(defaults.reaper.interval, Duration::from_secs),
                stuck_timeout: env_u64("REAPER_STUCK_TIMEOUT_SECS")
                    .map_or(defaults.reaper.stuck_timeout, Duration::from_secs),
            },
            reconcile_interval: env_u64("RECONCILE_INTERVAL_SECS")
                .map_or(defaults.reconcile_interval, Duration::from_secs),
            credits_per_job: defaults.credits_per_job,
            database_url: std::env::var("DATABASE_URL").ok(),
            redis_url: std::env::var("REDIS_URL").ok(),
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}
