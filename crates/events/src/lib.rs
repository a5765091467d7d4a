//! `sketchforge-events` — change notification layer.
//!
//! Mutations to jobs and accounts are published on a per-owner channel and
//! fanned out to subscribers. The stream is a **lossy notification layer**,
//! not a durable event log:
//!
//! - **At-least-once delivery**: consumers must apply updates idempotently
//!   (see [`VersionedCache`]).
//! - **Server-side filtering**: a subscription only ever yields events for
//!   its own owner id.
//! - **Gap recovery**: events can be missed while disconnected, so consumers
//!   re-fetch a fresh snapshot on (re)subscribe instead of assuming
//!   continuity (see [`ResilientObserver`]).

pub mod envelope;
pub mod notifier;
pub mod observer;

pub use envelope::{ChangeEvent, EntityKind};
pub use notifier::{ChangeNotifier, OwnerSubscription, SubscriptionError};
pub use observer::{ObserverConfig, ResilientObserver, VersionedCache};
