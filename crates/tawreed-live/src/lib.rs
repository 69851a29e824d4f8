// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Live collections for the Tawreed marketplace.
//!
//! A [`LiveCollection`] keeps a client-side view of one entity stream
//! (requests, offers, orders, ...) consistent with the backend:
//! - subscribes to the change feed and resubscribes with backoff after drops
//! - normalizes raw change payloads and drops malformed ones
//! - folds events, fetched pages, and optimistic writes into one ordered,
//!   de-duplicated collection
//! - reverts optimistic writes the backend refuses or never confirms
//! - falls back to polling when live updates are lost for good

pub mod adapters;
pub mod collection;
pub mod coordinator;
pub mod identity;
pub mod normalizer;
pub mod optimistic;
pub mod reconciler;
pub mod registry;
pub mod state;
pub mod subscription;

pub use adapters::{Announcement, EntityAdapter, adapter_for};
pub use collection::{LiveCollection, LiveDeps, LiveSettings};
pub use coordinator::MutationCoordinator;
pub use identity::default_filter;
pub use normalizer::{EventNormalizer, parse_timestamp};
pub use optimistic::{OptimisticPatch, PatchKind, PatchLedger};
pub use reconciler::{
    ChangeTag, CollectionChange, EntityCollection, Reconciler, RevertReason, Upsert,
};
pub use registry::{Listener, ListenerId, ListenerRegistry};
pub use state::{CollectionSnapshot, LIVE_UNAVAILABLE};
pub use subscription::{
    Delivery, FeedSignal, SubscriptionHandle, SubscriptionKey, SubscriptionManager,
    SubscriptionSettings,
};

/// Locks a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
