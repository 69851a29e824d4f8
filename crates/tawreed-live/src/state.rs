// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! State shared by a live collection's tasks and its mutation coordinator.
//!
//! Every mutation of the reconciler goes through [`Shared::commit`], which
//! publishes a new snapshot and dispatches listeners after the fold step.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tawreed_core::{ChangeEvent, EntityKind, NotificationSink, Row, Severity, TawreedError};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::warn;

use crate::adapters::adapter_for;
use crate::lock;
use crate::normalizer::EventNormalizer;
use crate::reconciler::{CollectionChange, Reconciler, RevertReason};
use crate::registry::ListenerRegistry;
use crate::subscription::Delivery;

/// Persistent error shown once live updates are lost.
pub const LIVE_UNAVAILABLE: &str = "live updates unavailable, showing last known data";

/// Immutable view of a collection, published after every change.
#[derive(Debug, Clone)]
pub struct CollectionSnapshot {
    pub rows: Arc<Vec<Row>>,
    /// True until the first page of the initial fetch has been applied.
    pub loading: bool,
    /// Set while live updates are unavailable.
    pub live_error: Option<String>,
    /// Optimistic changes awaiting confirmation.
    pub pending: usize,
}

impl Default for CollectionSnapshot {
    fn default() -> Self {
        Self {
            rows: Arc::new(Vec::new()),
            loading: true,
            live_error: None,
            pending: 0,
        }
    }
}

pub(crate) struct Shared {
    entity: EntityKind,
    reconciler: Mutex<Reconciler>,
    snapshot: watch::Sender<CollectionSnapshot>,
    listeners: ListenerRegistry,
    notifier: Arc<dyn NotificationSink>,
    normalizer: EventNormalizer,
    mounted: AtomicBool,
    announce: bool,
}

impl Shared {
    pub(crate) fn new(entity: EntityKind, notifier: Arc<dyn NotificationSink>, announce: bool) -> Self {
        let (snapshot, _) = watch::channel(CollectionSnapshot::default());
        Self {
            entity,
            reconciler: Mutex::new(Reconciler::new(entity)),
            snapshot,
            listeners: ListenerRegistry::new(),
            notifier,
            normalizer: EventNormalizer::new(),
            mounted: AtomicBool::new(true),
            announce,
        }
    }

    pub(crate) fn entity(&self) -> EntityKind {
        self.entity
    }

    pub(crate) fn normalizer(&self) -> &EventNormalizer {
        &self.normalizer
    }

    pub(crate) fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub(crate) fn notify(&self, title: &str, message: &str, severity: Severity) {
        if self.is_mounted() {
            self.notifier.notify(title, message, severity);
        }
    }

    pub(crate) fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }

    pub(crate) fn unmount(&self) {
        self.mounted.store(false, Ordering::Release);
        self.listeners.clear();
    }

    /// Runs one fold step. A no-op once unmounted.
    pub(crate) fn commit(&self, f: impl FnOnce(&mut Reconciler) -> Vec<CollectionChange>) -> Vec<CollectionChange> {
        if !self.is_mounted() {
            return Vec::new();
        }
        let changes = {
            let mut reconciler = lock(&self.reconciler);
            let changes = f(&mut reconciler);
            if !changes.is_empty() {
                self.publish(&reconciler);
            }
            changes
        };
        self.listeners.dispatch(&changes);
        changes
    }

    pub(crate) fn try_commit(
        &self,
        f: impl FnOnce(&mut Reconciler) -> Result<Vec<CollectionChange>, TawreedError>,
    ) -> Result<Vec<CollectionChange>, TawreedError> {
        if !self.is_mounted() {
            return Err(TawreedError::Unmounted);
        }
        let mut outcome = Ok(());
        let changes = self.commit(|reconciler| {
            f(reconciler).unwrap_or_else(|err| {
                outcome = Err(err);
                Vec::new()
            })
        });
        outcome.map(|()| changes)
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&Reconciler) -> R) -> R {
        f(&lock(&self.reconciler))
    }

    /// Normalizes and applies one delivered change; malformed ones are dropped.
    pub(crate) fn apply_delivery(&self, delivery: &Delivery) {
        match self
            .normalizer
            .normalize(self.entity, &delivery.raw, delivery.received_at)
        {
            Ok(event) => self.apply_event(&event),
            Err(warning) => warn!(
                entity = %self.entity,
                received_at = delivery.received_at.0,
                error = %warning,
                "dropping malformed change event"
            ),
        }
    }

    pub(crate) fn apply_event(&self, event: &ChangeEvent) {
        let mut announcement = None;
        self.commit(|reconciler| {
            let changes = reconciler.apply(event);
            let visible = changes.iter().any(|c| {
                matches!(
                    c,
                    CollectionChange::Inserted { .. } | CollectionChange::Updated { .. }
                )
            });
            if self.announce && visible {
                announcement =
                    adapter_for(self.entity).announce(event, reconciler.collection().get(event.id()));
            }
            changes
        });
        if let Some(a) = announcement {
            self.notify(&a.title, &a.message, a.severity);
        }
    }

    /// Reverts timed-out patches and tells the user about each.
    pub(crate) fn expire(&self, now: Instant) {
        let changes = self.commit(|reconciler| reconciler.expire(now));
        for change in &changes {
            if let CollectionChange::Reverted {
                id,
                kind,
                reason: RevertReason::TimedOut,
            } = change
            {
                self.notify(
                    "Change not confirmed",
                    &format!(
                        "The {kind} of {} {id} was not confirmed by the server and has been undone",
                        self.entity
                    ),
                    Severity::Error,
                );
            }
        }
    }

    pub(crate) fn set_loading(&self, loading: bool) {
        self.snapshot.send_if_modified(|s| {
            let changed = s.loading != loading;
            s.loading = loading;
            changed
        });
    }

    pub(crate) fn set_live_error(&self, error: Option<String>) {
        self.snapshot.send_if_modified(|s| {
            let changed = s.live_error != error;
            s.live_error = error;
            changed
        });
    }

    pub(crate) fn snapshot(&self) -> CollectionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<CollectionSnapshot> {
        self.snapshot.subscribe()
    }

    fn publish(&self, reconciler: &Reconciler) {
        let rows = Arc::new(reconciler.collection().as_slice().to_vec());
        let pending = reconciler.pending();
        self.snapshot.send_modify(|s| {
            s.rows = rows;
            s.pending = pending;
        });
    }
}
