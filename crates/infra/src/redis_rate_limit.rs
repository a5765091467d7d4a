//! Shared-counter fixed-window rate limiter.
//!
//! The in-memory limiter is only valid for a single instance; this variant
//! keeps the per-actor window counters in Redis so correctness holds when the
//! service scales horizontally.

use std::time::Duration;

use async_trait::async_trait;
use tracing::instrument;

use sketchforge_core::OwnerId;
use sketchforge_jobs::{RateLimitDecision, RateLimitError, RateLimiter};

#[derive(Clone)]
pub struct RedisRateLimiter {
    client: redis::Client,
    limit: u32,
    window: Duration,
    key_prefix: String,
}

impl RedisRateLimiter {
    pub fn new(redis_url: &str, limit: u32, window: Duration) -> Result<Self, RateLimitError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| RateLimitError::Storage(e.to_string()))?;
        Ok(Self {
            client,
            limit,
            window,
            key_prefix: "ratelimit".to_string(),
        })
    }

    fn key(&self, owner_id: OwnerId) -> String {
        format!("{}:{}", self.key_prefix, owner_id)
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    #[instrument(skip(self), fields(owner_id = %owner_id))]
    async fn check(&self, owner_id: OwnerId) -> Result<RateLimitDecision, RateLimitError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| RateLimitError::Storage(e.to_string()))?;

        let key = self.key(owner_id);
        let window_secs = self.window.as_secs().max(1) as i64;

        let count: i64 = redis::cmd("INCR")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| RateLimitError::Storage(e.to_string()))?;

        if count == 1 {
            // First hit opens the window.
            let _: () = redis::cmd("EXPIRE")
                .arg(&key)
                .arg(window_secs)
                .query_async(&mut conn)
                .await
                .map_err(|e| RateLimitError::Storage(e.to_string()))?;
        }

        if count > i64::from(self.limit) {
            let ttl: i64 = redis::cmd("TTL")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(|e| RateLimitError::Storage(e.to_string()))?;
            let retry_after = Duration::from_secs(ttl.max(1) as u64);
            return Ok(RateLimitDecision::Limited { retry_after });
        }

        Ok(RateLimitDecision::Allowed)
    }
}
