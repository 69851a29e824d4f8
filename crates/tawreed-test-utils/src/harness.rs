// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` wires a [`MockBackend`] and a [`RecordingNotifier`] into
//! live collections with timings short enough for paused-clock tests.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tawreed_core::{ActorIdentity, ActorRole, EntityKind, Filter};
use tawreed_live::{LiveCollection, LiveDeps, LiveSettings, SubscriptionSettings};
use tawreed_resilience::BackoffPolicy;

use crate::mock_backend::MockBackend;
use crate::recording_notifier::RecordingNotifier;

/// Settings with millisecond backoff and short timers.
pub fn fast_settings() -> LiveSettings {
    LiveSettings {
        subscription: SubscriptionSettings {
            handshake_attempts: 3,
            backoff: BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(80)),
            max_reconnect_attempts: None,
        },
        optimistic_timeout: Duration::from_secs(2),
        sweep_interval: Duration::from_millis(50),
        polling_interval: Duration::from_secs(1),
        page_size: 50,
        max_initial_pages: 4,
        inbox_capacity: 64,
        announce_remote_changes: true,
    }
}

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    settings: LiveSettings,
    actor: ActorIdentity,
    seeds: Vec<(EntityKind, Vec<Value>)>,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            settings: fast_settings(),
            actor: ActorIdentity::new("admin-1", ActorRole::Admin),
            seeds: Vec::new(),
        }
    }

    pub fn with_actor(mut self, actor: ActorIdentity) -> Self {
        self.actor = actor;
        self
    }

    pub fn with_settings(mut self, settings: LiveSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_optimistic_timeout(mut self, timeout: Duration) -> Self {
        self.settings.optimistic_timeout = timeout;
        self
    }

    pub fn with_handshake_attempts(mut self, attempts: u32) -> Self {
        self.settings.subscription.handshake_attempts = attempts;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.settings.subscription.max_reconnect_attempts = Some(attempts);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.settings.page_size = page_size;
        self
    }

    pub fn with_announcements(mut self, announce: bool) -> Self {
        self.settings.announce_remote_changes = announce;
        self
    }

    /// Rows present in the backend before anything mounts.
    pub fn with_rows(mut self, entity: EntityKind, rows: Vec<Value>) -> Self {
        self.seeds.push((entity, rows));
        self
    }

    pub async fn build(self) -> TestHarness {
        let backend = Arc::new(MockBackend::new());
        for (entity, rows) in self.seeds {
            backend.seed(entity, rows).await;
        }
        TestHarness {
            backend,
            notifier: Arc::new(RecordingNotifier::new()),
            settings: self.settings,
            actor: self.actor,
        }
    }
}

/// A complete test environment around one mock backend.
pub struct TestHarness {
    /// The in-memory backend serving queries, writes and the change feed.
    pub backend: Arc<MockBackend>,
    /// Captures every notification the collections send.
    pub notifier: Arc<RecordingNotifier>,
    pub settings: LiveSettings,
    /// Actor used by [`TestHarness::mount`].
    pub actor: ActorIdentity,
}

impl TestHarness {
    /// Create a new builder for configuring the test harness.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    pub fn deps(&self) -> LiveDeps {
        LiveDeps {
            data: self.backend.clone(),
            feed: self.backend.clone(),
            notifier: self.notifier.clone(),
        }
    }

    /// Mounts a collection scoped to the harness actor.
    pub fn mount(&self, entity: EntityKind) -> LiveCollection {
        LiveCollection::mount(entity, &self.actor, self.deps(), self.settings.clone())
    }

    pub fn mount_with_filter(&self, entity: EntityKind, filter: Filter) -> LiveCollection {
        LiveCollection::mount_with_filter(entity, filter, self.deps(), self.settings.clone())
    }

    /// Mounts a collection and waits until its initial fetch and
    /// subscription are both in place.
    pub async fn mount_ready(&self, entity: EntityKind) -> LiveCollection {
        let collection = self.mount(entity);
        collection.wait_loaded().await;
        eventually("subscription to open", || collection.subscription().is_some()).await;
        collection
    }
}

/// Polls `condition` on a short virtual-time interval, panicking after ten
/// seconds without success.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let step = Duration::from_millis(5);
    for _ in 0..2000 {
        if condition() {
            return;
        }
        tokio::time::sleep(step).await;
    }
    panic!("timed out waiting for {what}");
}
