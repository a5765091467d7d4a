//! Per-actor fixed-window throttle guarding job admission.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use sketchforge_core::OwnerId;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit storage error: {0}")]
    Storage(String),
}

/// Admission throttle. A `Limited` decision carries the time until the
/// actor's window resets.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check(&self, owner_id: OwnerId) -> Result<RateLimitDecision, RateLimitError>;
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    count: u32,
    reset_at: Instant,
}

/// In-memory fixed-window counter.
///
/// Counters are process-local: valid for a single-instance deployment only.
/// Multi-instance deployments need the shared-counter variant (see the
/// redis-backed limiter in `sketchforge-infra`).
#[derive(Debug)]
pub struct FixedWindowRateLimiter {
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<OwnerId, WindowState>>,
}

impl FixedWindowRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn check_sync(&self, owner_id: OwnerId) -> Result<RateLimitDecision, RateLimitError> {
        let now = Instant::now();
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| RateLimitError::Storage("rate limiter lock poisoned".to_string()))?;

        let state = windows.entry(owner_id).or_insert(WindowState {
            count: 0,
            reset_at: now + self.window,
        });

        if now >= state.reset_at {
            state.count = 0;
            state.reset_at = now + self.window;
        }

        if state.count >= self.limit {
            return Ok(RateLimitDecision::Limited {
                retry_after: state.reset_at.saturating_duration_since(now),
            });
        }

        state.count += 1;
        Ok(RateLimitDecision::Allowed)
    }
}

#[async_trait]
impl RateLimiter for FixedWindowRateLimiter {
    async fn check(&self, owner_id: OwnerId) -> Result<RateLimitDecision, RateLimitError> {
        self.check_sync(owner_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_rejects_with_retry_after() {
        let limiter = FixedWindowRateLimiter::new(3, Duration::from_secs(60));
        let owner = OwnerId::new();

        for _ in 0..3 {
            assert_eq!(limiter.check_sync(owner).unwrap(), RateLimitDecision::Allowed);
        }

        match limiter.check_sync(owner).unwrap() {
            RateLimitDecision::Limited { retry_after } => {
                assert!(retry_after > Duration::ZERO);
                assert!(retry_after <= Duration::from_secs(60));
            }
            other => panic!("expected limited, got {other:?}"),
        }
    }

    #[test]
    fn windows_are_per_actor() {
        let limiter = FixedWindowRateLimiter::new(1, Duration::from_secs(60));
        let alice = OwnerId::new();
        let bob = OwnerId::new();

        assert_eq!(limiter.check_sync(alice).unwrap(), RateLimitDecision::Allowed);
        assert!(matches!(
            limiter.check_sync(alice).unwrap(),
            RateLimitDecision::Limited { .. }
        ));
        // Alice's exhaustion does not affect Bob.
        assert_eq!(limiter.check_sync(bob).unwrap(), RateLimitDecision::Allowed);
    }

    #[test]
    fn window_resets_after_expiry() {
        let limiter = FixedWindowRateLimiter::new(1, Duration::from_millis(20));
        let owner = OwnerId::new();

        assert_eq!(limiter.check_sync(owner).unwrap(), RateLimitDecision::Allowed);
        assert!(matches!(
            limiter.check_sync(owner).unwrap(),
            RateLimitDecision::Limited { .. }
        ));

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(limiter.check_sync(owner).unwrap(), RateLimitDecision::Allowed);
    }
}
