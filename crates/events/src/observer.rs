//! Consumer-side resilience.
//!
//! [`ResilientObserver`] owns the reconnect state machine for a per-owner
//! subscription: on lag it backs off, resubscribes, and asks the consumer to
//! re-fetch a snapshot before resuming, because events may have been missed
//! in the gap. [`VersionedCache`] gives consumers latest-wins idempotency for
//! the at-least-once stream.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use sketchforge_core::OwnerId;

use crate::notifier::{ChangeNotifier, SubscriptionError};
use crate::ChangeEvent;

/// Reconnect/backoff tuning for [`ResilientObserver`].
#[derive(Debug, Clone, Copy)]
pub struct ObserverConfig {
    /// Delay before the first resubscribe attempt.
    pub initial_backoff: Duration,
    /// Backoff cap (doubles up to this).
    pub max_backoff: Duration,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Per-owner observer that survives gaps in the notification stream.
#[derive(Debug, Clone)]
pub struct ResilientObserver {
    notifier: ChangeNotifier,
    owner_id: OwnerId,
    config: ObserverConfig,
}

impl ResilientObserver {
    pub fn new(notifier: ChangeNotifier, owner_id: OwnerId, config: ObserverConfig) -> Self {
        Self {
            notifier,
            owner_id,
            config,
        }
    }

    /// Drive the subscription until the notifier closes.
    ///
    /// `on_resync` runs on every (re)subscribe, including the first, and is
    /// where the consumer re-fetches its snapshot; `on_event` receives each
    /// subsequent event. Events seen through this loop may still repeat, so
    /// `on_event` must stay idempotent (see [`VersionedCache`]).
    pub async fn run<Rs, RsFut, Ev>(&self, mut on_resync: Rs, mut on_event: Ev)
    where
        Rs: FnMut() -> RsFut,
        RsFut: Future<Output = ()>,
        Ev: FnMut(ChangeEvent),
    {
        let mut backoff = self.config.initial_backoff;

        'subscribe: loop {
            let mut sub = self.notifier.subscribe_owner(self.owner_id);
            on_resync().await;
            debug!(owner_id = %self.owner_id, "observer subscribed");

            loop {
                match sub.recv().await {
                    Ok(event) => {
                        backoff = self.config.initial_backoff;
                        on_event(event);
                    }
                    Err(SubscriptionError::Lagged { skipped }) => {
                        warn!(
                            owner_id = %self.owner_id,
                            skipped,
                            backoff_ms = backoff.as_millis() as u64,
                            "observer lagged, resubscribing"
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(self.config.max_backoff);
                        continue 'subscribe;
                    }
                    Err(SubscriptionError::Closed) => {
                        debug!(owner_id = %self.owner_id, "notifier closed, observer stopping");
                        return;
                    }
                }
            }
        }
    }
}

/// Latest-wins cache keyed by entity id.
///
/// `apply_if_newer` only replaces held state when the incoming version is not
/// older than the stored one, which makes replaying the same (or a stale)
/// event a no-op.
#[derive(Debug, Default)]
pub struct VersionedCache<T> {
    entries: HashMap<Uuid, (DateTime<Utc>, T)>,
}

impl<T> VersionedCache<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Returns `true` when the value was applied.
    pub fn apply_if_newer(&mut self, entity_id: Uuid, version: DateTime<Utc>, value: T) -> bool {
        match self.entries.get(&entity_id) {
            Some((held, _)) if *held > version => false,
            _ => {
                self.entries.insert(entity_id, (version, value));
                true
            }
        }
    }

    pub fn get(&self, entity_id: &Uuid) -> Option<&T> {
        self.entries.get(entity_id).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything held; used when a snapshot refetch replaces the world.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
