//! In-process change fan-out.
//!
//! Built on a lossy broadcast channel: publishing never blocks the mutation
//! path, and a slow subscriber only loses its own messages (surfaced as
//! [`SubscriptionError::Lagged`] so it can resynchronize).

use thiserror::Error;
use tokio::sync::broadcast;

use sketchforge_core::OwnerId;

use crate::envelope::ChangeEvent;

/// Error surfaced by [`OwnerSubscription::recv`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The subscriber fell behind and `skipped` events were dropped for it.
    /// Consumers must re-fetch a snapshot; the stream is not a durable log.
    #[error("subscription lagged, skipped {skipped} events")]
    Lagged { skipped: u64 },

    /// The notifier was dropped; no further events will arrive.
    #[error("channel closed")]
    Closed,
}

/// Publish/subscribe hub for [`ChangeEvent`]s.
///
/// Filtering is applied **server-side**: an [`OwnerSubscription`] never
/// yields another owner's events, regardless of what the consumer asks for.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a change event. Lossy: if nobody is subscribed, or a
    /// subscriber is saturated, the event is dropped for them without
    /// applying backpressure to the mutation path.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to events for a single owner.
    pub fn subscribe_owner(&self, owner_id: OwnerId) -> OwnerSubscription {
        OwnerSubscription {
            owner_id,
            rx: self.tx.subscribe(),
        }
    }

    /// Number of currently attached subscribers (all owners).
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

/// A subscription yielding only one owner's events.
#[derive(Debug)]
pub struct OwnerSubscription {
    owner_id: OwnerId,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl OwnerSubscription {
    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    /// Wait for the next event addressed to this subscription's owner.
    pub async fn recv(&mut self) -> Result<ChangeEvent, SubscriptionError> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.owner_id() == self.owner_id => return Ok(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return Err(SubscriptionError::Lagged { skipped });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(SubscriptionError::Closed);
                }
            }
        }
    }

    /// Non-blocking variant; `Ok(None)` when no event is pending.
    pub fn try_recv(&mut self) -> Result<Option<ChangeEvent>, SubscriptionError> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if event.owner_id() == self.owner_id => return Ok(Some(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    return Err(SubscriptionError::Lagged { skipped });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(SubscriptionError::Closed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::envelope::EntityKind;

    fn event_for(owner: OwnerId, status: &str) -> ChangeEvent {
        ChangeEvent::new(
            owner,
            EntityKind::Job,
            Uuid::now_v7(),
            Some(status.to_string()),
            Utc::now(),
            serde_json::json!({}),
        )
    }

    #[tokio::test]
    async fn subscriber_only_sees_own_owner() {
        let notifier = ChangeNotifier::new(16);
        let alice = OwnerId::new();
        let bob = OwnerId::new();

        let mut sub = notifier.subscribe_owner(alice);

        notifier.publish(event_for(bob, "completed"));
        notifier.publish(event_for(alice, "failed"));

        let got = sub.recv().await.unwrap();
        assert_eq!(got.owner_id(), alice);
        assert_eq!(got.status(), Some("failed"));
        assert!(matches!(sub.try_recv(), Ok(None)));
    }

    #[tokio::test]
    async fn lag_is_surfaced_not_hidden() {
        let notifier = ChangeNotifier::new(2);
        let owner = OwnerId::new();
        let mut sub = notifier.subscribe_owner(owner);

        for _ in 0..5 {
            notifier.publish(event_for(owner, "completed"));
        }

        // Channel capacity 2: the subscription must report the gap rather
        // than silently dropping events.
        match sub.recv().await {
            Err(SubscriptionError::Lagged { skipped }) => assert!(skipped > 0),
            other => panic!("expected lag, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_when_notifier_dropped() {
        let notifier = ChangeNotifier::new(4);
        let mut sub = notifier.subscribe_owner(OwnerId::new());
        drop(notifier);
        assert_eq!(sub.recv().await, Err(SubscriptionError::Closed));
    }
}
