// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One consumer's live view of an entity stream.
//!
//! Mounting a [`LiveCollection`] starts three tasks under the collection's
//! cancellation token: a driver that opens the change-feed subscription and
//! folds delivered events, an initial paged fetch, and a sweeper that
//! reverts optimistic changes nobody confirmed. If the subscription is lost
//! for good the driver shows a persistent error and switches to polling.
//! Unmounting (or dropping) the collection stops all of it.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use serde_json::{Map, Value};
use tawreed_config::TawreedConfig;
use tawreed_core::{
    ActorIdentity, ChangeFeed, DataService, EntityId, EntityKind, Filter, NotificationSink, Row,
    RowQuery, Severity, SubscriptionError, TawreedError, TransportError,
};
use tawreed_resilience::ScheduledTask;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::coordinator::MutationCoordinator;
use crate::identity::default_filter;
use crate::lock;
use crate::reconciler::{ChangeTag, CollectionChange};
use crate::registry::ListenerId;
use crate::state::{CollectionSnapshot, LIVE_UNAVAILABLE, Shared};
use crate::subscription::{FeedSignal, SubscriptionHandle, SubscriptionManager, SubscriptionSettings};

/// External collaborators of a live collection.
#[derive(Clone)]
pub struct LiveDeps {
    pub data: Arc<dyn DataService>,
    pub feed: Arc<dyn ChangeFeed>,
    pub notifier: Arc<dyn NotificationSink>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSettings {
    pub subscription: SubscriptionSettings,
    pub optimistic_timeout: Duration,
    pub sweep_interval: Duration,
    pub polling_interval: Duration,
    pub page_size: usize,
    pub max_initial_pages: usize,
    pub inbox_capacity: usize,
    pub announce_remote_changes: bool,
}

impl From<&TawreedConfig> for LiveSettings {
    fn from(config: &TawreedConfig) -> Self {
        let live = &config.live;
        Self {
            subscription: SubscriptionSettings::from(live),
            optimistic_timeout: live.optimistic_timeout(),
            sweep_interval: live.sweep_interval(),
            polling_interval: live.polling_interval(),
            page_size: live.page_size,
            max_initial_pages: live.max_initial_pages,
            inbox_capacity: live.inbox_capacity,
            announce_remote_changes: config.notifications.announce_remote_changes,
        }
    }
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self::from(&TawreedConfig::default())
    }
}

/// Everything the background tasks need to fetch pages.
#[derive(Clone)]
struct Fetcher {
    data: Arc<dyn DataService>,
    shared: Arc<Shared>,
    filter: Filter,
    page_size: usize,
    max_pages: usize,
}

impl Fetcher {
    /// Fetches up to `max_pages` pages, handing each to `on_page` as it lands.
    async fn pages(&self, mut on_page: impl FnMut(Vec<Row>)) -> Result<(), TransportError> {
        let entity = self.shared.entity();
        let mut offset = 0;
        for _ in 0..self.max_pages {
            let query = RowQuery {
                filter: self.filter.clone(),
                offset,
                limit: self.page_size,
            };
            let page = self.data.query(entity, &query).await?;
            let rows = page
                .rows
                .iter()
                .filter_map(|raw| {
                    self.shared
                        .normalizer()
                        .normalize_row(entity, &Value::Object(raw.clone()))
                        .map_err(|w| warn!(entity = %entity, error = %w, "dropping malformed fetched row"))
                        .ok()
                })
                .collect();
            on_page(rows);
            match page.next_offset {
                Some(next) => offset = next,
                None => break,
            }
        }
        Ok(())
    }

    async fn initial_load(&self) {
        let entity = self.shared.entity();
        let result = self
            .pages(|rows| {
                self.shared.commit(|r| r.apply_fetched(rows));
                self.shared.set_loading(false);
            })
            .await;
        match result {
            Ok(()) => debug!(entity = %entity, "initial fetch complete"),
            Err(err) => {
                warn!(entity = %entity, error = %err, "initial fetch failed");
                self.shared.set_loading(false);
                self.shared
                    .notify("Could not load data", &err.message, Severity::Error);
            }
        }
    }

    /// Refetches everything and rebuilds the collection from it.
    async fn resync(&self) -> Result<(), TransportError> {
        let mut rows = Vec::new();
        self.pages(|page| rows.extend(page)).await?;
        let changes = self.shared.commit(|r| r.resync(rows));
        debug!(entity = %self.shared.entity(), changes = changes.len(), "collection resynced");
        Ok(())
    }
}

/// A reconciled, live-updating view of one entity stream.
pub struct LiveCollection {
    entity: EntityKind,
    filter: Filter,
    shared: Arc<Shared>,
    coordinator: Arc<MutationCoordinator>,
    subscriptions: Arc<SubscriptionManager>,
    subscription: Arc<OnceLock<Arc<SubscriptionHandle>>>,
    fetcher: Fetcher,
    cancel: CancellationToken,
    tasks: Arc<Mutex<Vec<ScheduledTask>>>,
}

impl LiveCollection {
    /// Mounts a collection scoped to what `actor` may see by default.
    pub fn mount(
        entity: EntityKind,
        actor: &ActorIdentity,
        deps: LiveDeps,
        settings: LiveSettings,
    ) -> Self {
        Self::mount_with_filter(entity, default_filter(entity, actor), deps, settings)
    }

    /// Mounts a collection for an explicit filter. Must be called from
    /// within a tokio runtime.
    pub fn mount_with_filter(
        entity: EntityKind,
        filter: Filter,
        deps: LiveDeps,
        settings: LiveSettings,
    ) -> Self {
        let cancel = CancellationToken::new();
        let shared = Arc::new(Shared::new(
            entity,
            deps.notifier,
            settings.announce_remote_changes,
        ));
        let (inbox_tx, inbox_rx) = mpsc::channel(settings.inbox_capacity.max(1));
        let subscriptions = Arc::new(SubscriptionManager::new(
            deps.feed,
            settings.subscription.clone(),
            inbox_tx,
            &cancel,
        ));
        let fetcher = Fetcher {
            data: Arc::clone(&deps.data),
            shared: Arc::clone(&shared),
            filter: filter.clone(),
            page_size: settings.page_size,
            max_pages: settings.max_initial_pages,
        };
        let coordinator = Arc::new(MutationCoordinator::new(
            Arc::clone(&shared),
            deps.data,
            settings.optimistic_timeout,
        ));

        let collection = Self {
            entity,
            filter,
            shared,
            coordinator,
            subscriptions,
            subscription: Arc::new(OnceLock::new()),
            fetcher,
            cancel,
            tasks: Arc::new(Mutex::new(Vec::new())),
        };
        collection.start(inbox_rx, &settings);
        info!(entity = %entity, filter = %collection.filter, "live collection mounted");
        collection
    }

    fn start(&self, inbox: mpsc::Receiver<FeedSignal>, settings: &LiveSettings) {
        let driver = Driver {
            subscriptions: Arc::clone(&self.subscriptions),
            subscription: Arc::clone(&self.subscription),
            shared: Arc::clone(&self.shared),
            fetcher: self.fetcher.clone(),
            filter: self.filter.clone(),
            tasks: Arc::clone(&self.tasks),
            cancel: self.cancel.clone(),
            polling_interval: settings.polling_interval,
        };
        let driver = ScheduledTask::spawn("live-driver", &self.cancel, move |_| driver.run(inbox));

        let fetcher = self.fetcher.clone();
        let fetch = ScheduledTask::spawn("live-fetch", &self.cancel, move |_| async move {
            fetcher.initial_load().await;
        });

        let shared = Arc::clone(&self.shared);
        let sweeper = ScheduledTask::every("live-sweep", settings.sweep_interval, &self.cancel, move || {
            let shared = Arc::clone(&shared);
            async move { shared.expire(Instant::now()) }
        });

        lock(&self.tasks).extend([driver, fetch, sweeper]);
    }

    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn snapshot(&self) -> CollectionSnapshot {
        self.shared.snapshot()
    }

    pub fn rows(&self) -> Arc<Vec<Row>> {
        self.shared.snapshot().rows
    }

    pub fn get(&self, id: &EntityId) -> Option<Row> {
        self.shared.read(|r| r.collection().get(id).cloned())
    }

    pub fn len(&self) -> usize {
        self.shared.read(|r| r.collection().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receiver that sees every published snapshot.
    pub fn watch(&self) -> watch::Receiver<CollectionSnapshot> {
        self.shared.watch()
    }

    pub fn is_loading(&self) -> bool {
        self.shared.snapshot().loading
    }

    /// Waits until the first page of the initial fetch has been applied.
    pub async fn wait_loaded(&self) {
        let mut rx = self.shared.watch();
        let _ = rx.wait_for(|s| !s.loading).await;
    }

    pub fn live_error(&self) -> Option<String> {
        self.shared.snapshot().live_error
    }

    /// The change-feed handle, once the handshake has succeeded.
    pub fn subscription(&self) -> Option<Arc<SubscriptionHandle>> {
        self.subscription.get().cloned()
    }

    /// Registers a listener for applied changes of one kind, or all kinds.
    pub fn on<F>(&self, tag: Option<ChangeTag>, listener: F) -> ListenerId
    where
        F: Fn(&CollectionChange) + Send + Sync + 'static,
    {
        self.shared.listeners().on(tag, listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.shared.listeners().off(id)
    }

    /// Shareable handle for issuing writes from other tasks.
    pub fn mutations(&self) -> Arc<MutationCoordinator> {
        Arc::clone(&self.coordinator)
    }

    pub async fn create(&self, fields: Map<String, Value>) -> Result<Row, TawreedError> {
        self.coordinator.create(fields).await
    }

    pub async fn update(&self, id: &EntityId, patch: Map<String, Value>) -> Result<Row, TawreedError> {
        self.coordinator.update(id, patch).await
    }

    pub async fn delete(&self, id: &EntityId) -> Result<(), TawreedError> {
        self.coordinator.delete(id).await
    }

    /// Refetches the collection and rebuilds it, keeping pending changes.
    pub async fn refresh(&self) -> Result<(), TawreedError> {
        if !self.shared.is_mounted() {
            return Err(TawreedError::Unmounted);
        }
        Ok(self.fetcher.resync().await?)
    }

    /// Closes subscriptions, cancels timers and polling, and drops listeners.
    ///
    /// In-flight writes still complete but no longer touch the collection.
    pub async fn unmount(self) {
        self.shared.unmount();
        self.cancel.cancel();
        self.subscriptions.close_all().await;
        let tasks: Vec<ScheduledTask> = lock(&self.tasks).drain(..).collect();
        for task in tasks {
            task.shutdown().await;
        }
        info!(entity = %self.entity, filter = %self.filter, "live collection unmounted");
    }
}

impl Drop for LiveCollection {
    fn drop(&mut self) {
        self.shared.unmount();
        self.cancel.cancel();
    }
}

/// Opens the subscription and folds what it delivers.
struct Driver {
    subscriptions: Arc<SubscriptionManager>,
    subscription: Arc<OnceLock<Arc<SubscriptionHandle>>>,
    shared: Arc<Shared>,
    fetcher: Fetcher,
    filter: Filter,
    tasks: Arc<Mutex<Vec<ScheduledTask>>>,
    cancel: CancellationToken,
    polling_interval: Duration,
}

impl Driver {
    async fn run(self, mut inbox: mpsc::Receiver<FeedSignal>) {
        let entity = self.shared.entity();
        match self.subscriptions.open(entity, self.filter.clone()).await {
            Ok(handle) => {
                let _ = self.subscription.set(handle);
            }
            Err(err) => return self.fall_back(err),
        }
        while let Some(signal) = inbox.recv().await {
            match signal {
                FeedSignal::Change(delivery) => self.shared.apply_delivery(&delivery),
                FeedSignal::Resubscribed => {
                    if let Err(err) = self.fetcher.resync().await {
                        warn!(entity = %entity, error = %err, "refresh after resubscribe failed");
                    }
                }
                FeedSignal::Fatal(err) => return self.fall_back(err),
            }
        }
    }

    /// Shows the persistent error and starts polling in place of the feed.
    fn fall_back(&self, err: SubscriptionError) {
        if !self.shared.is_mounted() {
            return;
        }
        error!(
            entity = %err.entity,
            filter = %err.filter,
            attempts = err.attempts,
            error = %err,
            interval_secs = self.polling_interval.as_secs(),
            "live updates lost, polling instead"
        );
        self.shared.set_live_error(Some(LIVE_UNAVAILABLE.to_string()));
        self.shared
            .notify("Live updates unavailable", LIVE_UNAVAILABLE, Severity::Error);

        let fetcher = self.fetcher.clone();
        let poll = ScheduledTask::every("live-poll", self.polling_interval, &self.cancel, move || {
            let fetcher = fetcher.clone();
            async move {
                if let Err(err) = fetcher.resync().await {
                    warn!(entity = %fetcher.shared.entity(), error = %err, "polling refresh failed");
                }
            }
        });
        lock(&self.tasks).push(poll);
    }
}
