//! Shared TTL cache for analysis results.
//!
//! The in-memory cache only helps the instance that populated it; this
//! variant keys entries in Redis (`SET ... EX`) so every instance sees them.
//! Failures degrade to a cache miss, never a failed transform.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use sketchforge_transform::AnalysisCache;

#[derive(Clone)]
pub struct RedisAnalysisCache {
    client: redis::Client,
    ttl: Duration,
    key_prefix: String,
}

impl RedisAnalysisCache {
    pub fn new(redis_url: &str, ttl: Duration) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            ttl,
            key_prefix: "analysis".to_string(),
        })
    }

    fn key(&self, fingerprint: &str) -> String {
        format!("{}:{}", self.key_prefix, fingerprint)
    }
}

#[async_trait]
impl AnalysisCache for RedisAnalysisCache {
    async fn get(&self, fingerprint: &str) -> Option<String> {
        let mut conn = match self.client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "analysis cache unavailable, treating as miss");
                return None;
            }
        };

        match redis::cmd("GET")
            .arg(self.key(fingerprint))
            .query_async::<_, Option<String>>(&mut conn)
            .await
        {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "analysis cache read failed, treating as miss");
                None
            }
        }
    }

    async fn put(&self, fingerprint: &str, analysis: String) {
        let mut conn = match self.client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "analysis cache unavailable, skipping store");
                return;
            }
        };

        let result: Result<(), redis::RedisError> = redis::cmd("SET")
            .arg(self.key(fingerprint))
            .arg(analysis)
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await;
        if let Err(e) = result {
            warn!(error = %e, "analysis cache write failed");
        }
    }
}
