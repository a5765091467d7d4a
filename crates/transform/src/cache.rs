//! TTL cache for the expensive analysis stage.
//!
//! Keyed by a fingerprint of the request (style + image payload), so a
//! resubmission of the same drawing within the TTL skips the vision call.
//! Lookups fail open: a cache outage costs one extra upstream call, never a
//! failed job.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::client::TransformRequest;

/// Cache fingerprint for a transform request.
pub fn request_fingerprint(request: &TransformRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.style.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(request.image_data.as_bytes());
    let digest = hasher.finalize();

    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use core::fmt::Write;
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Analysis result cache.
#[async_trait]
pub trait AnalysisCache: Send + Sync {
    async fn get(&self, fingerprint: &str) -> Option<String>;
    async fn put(&self, fingerprint: &str, analysis: String);
}

/// Process-local TTL cache with a bounded entry count.
///
/// Only valid for a single-instance deployment; multi-instance deployments
/// use the shared redis-backed variant in `sketchforge-infra`.
#[derive(Debug)]
pub struct InMemoryAnalysisCache {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<String, (Instant, String)>>,
}

impl InMemoryAnalysisCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_sync(&self, fingerprint: &str) -> Option<String> {
        let entries = self.entries.lock().ok()?;
        match entries.get(fingerprint) {
            Some((stored_at, analysis)) if stored_at.elapsed() < self.ttl => {
                Some(analysis.clone())
            }
            _ => None,
        }
    }

    pub fn put_sync(&self, fingerprint: &str, analysis: String) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        // Evict expired entries first, then oldest if still over capacity.
        let ttl = self.ttl;
        entries.retain(|_, (stored_at, _)| stored_at.elapsed() < ttl);
        if entries.len() >= self.max_entries {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, (stored_at, _))| *stored_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(fingerprint.to_string(), (Instant::now(), analysis));
    }
}

impl Default for InMemoryAnalysisCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(5 * 60), 100)
    }
}

#[async_trait]
impl AnalysisCache for InMemoryAnalysisCache {
    async fn get(&self, fingerprint: &str) -> Option<String> {
        self.get_sync(fingerprint)
    }

    async fn put(&self, fingerprint: &str, analysis: String) {
        self.put_sync(fingerprint, analysis);
    }
}
