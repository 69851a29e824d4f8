// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Change-feed channel lifecycle.
//!
//! [`SubscriptionManager`] opens one channel per `(entity, filter)` pair and
//! forwards every raw change into the owner's inbox in arrival order. Each
//! channel is represented by a [`SubscriptionHandle`] whose status moves
//! `Connecting -> Subscribed`, `Subscribed -> Degraded` on a transport drop,
//! `Degraded -> Subscribed` once resubscribed, and to `Closed` on teardown
//! or fatal loss.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use futures::StreamExt;
use tawreed_config::LiveConfig;
use tawreed_core::traits::RawChangeStream;
use tawreed_core::{
    ChangeFeed, EntityKind, Filter, RawChange, ReceiptStamp, SubscriptionError,
    SubscriptionStatus, TransportError,
};
use tawreed_resilience::BackoffPolicy;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::lock;

/// Handshake and reconnect tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSettings {
    /// Handshake attempts before `open` gives up.
    pub handshake_attempts: u32,
    pub backoff: BackoffPolicy,
    /// Bound on resubscribe attempts after a drop. `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
}

impl From<&LiveConfig> for SubscriptionSettings {
    fn from(config: &LiveConfig) -> Self {
        Self {
            handshake_attempts: config.handshake_attempts,
            backoff: BackoffPolicy::new(config.backoff_base(), config.backoff_cap()),
            max_reconnect_attempts: config.max_reconnect_attempts,
        }
    }
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self::from(&LiveConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub entity: EntityKind,
    pub filter: Filter,
}

/// A raw change stamped with its receipt order.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub entity: EntityKind,
    pub raw: RawChange,
    pub received_at: ReceiptStamp,
}

/// What a channel pushes into its owner's inbox.
#[derive(Debug, Clone)]
pub enum FeedSignal {
    Change(Delivery),
    /// The channel came back after a drop. Changes made while it was down
    /// were not delivered.
    Resubscribed,
    /// The channel is gone for good; the owner must fall back.
    Fatal(SubscriptionError),
}

#[derive(Debug)]
struct HandleState {
    status: watch::Sender<SubscriptionStatus>,
    retry_count: AtomicU32,
    last_error: StdMutex<Option<String>>,
}

impl HandleState {
    fn set_status(&self, status: SubscriptionStatus) -> SubscriptionStatus {
        self.status.send_replace(status)
    }

    fn record_failure(&self, attempt: u32, message: &str) {
        self.retry_count.store(attempt, Ordering::Relaxed);
        *lock(&self.last_error) = Some(message.to_string());
    }

    fn mark_subscribed(&self) {
        self.retry_count.store(0, Ordering::Relaxed);
        self.set_status(SubscriptionStatus::Subscribed);
    }
}

/// One open change-feed channel.
///
/// The retry timer and pump task live and die with the handle: dropping it
/// or calling [`SubscriptionHandle::close`] stops both.
#[derive(Debug)]
pub struct SubscriptionHandle {
    key: SubscriptionKey,
    state: Arc<HandleState>,
    cancel: CancellationToken,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl SubscriptionHandle {
    fn new(key: SubscriptionKey, cancel: CancellationToken) -> Self {
        let (status, _) = watch::channel(SubscriptionStatus::Connecting);
        Self {
            key,
            state: Arc::new(HandleState {
                status,
                retry_count: AtomicU32::new(0),
                last_error: StdMutex::new(None),
            }),
            cancel,
            task: StdMutex::new(None),
        }
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    pub fn entity(&self) -> EntityKind {
        self.key.entity
    }

    pub fn filter(&self) -> &Filter {
        &self.key.filter
    }

    pub fn status(&self) -> SubscriptionStatus {
        *self.state.status.borrow()
    }

    /// Observes status changes, e.g. to show a "reconnecting" indicator.
    pub fn watch_status(&self) -> watch::Receiver<SubscriptionStatus> {
        self.state.status.subscribe()
    }

    /// Failed attempts in the current handshake or reconnect cycle.
    pub fn retry_count(&self) -> u32 {
        self.state.retry_count.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.state.last_error).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.status() == SubscriptionStatus::Closed
    }

    /// Stops the channel and waits for its task. Closing twice is a no-op.
    pub async fn close(&self) {
        self.cancel.cancel();
        let task = lock(&self.task).take();
        if let Some(task) = task
            && let Err(err) = task.await
            && !err.is_cancelled()
        {
            warn!(entity = %self.key.entity, filter = %self.key.filter, error = %err, "subscription task failed");
        }
        if self.state.set_status(SubscriptionStatus::Closed) != SubscriptionStatus::Closed {
            info!(entity = %self.key.entity, filter = %self.key.filter, "subscription closed");
        }
    }

    fn attach(&self, task: JoinHandle<()>) {
        *lock(&self.task) = Some(task);
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Opens and tears down change-feed channels for one owner.
pub struct SubscriptionManager {
    feed: Arc<dyn ChangeFeed>,
    settings: SubscriptionSettings,
    sink: mpsc::Sender<FeedSignal>,
    handles: Mutex<HashMap<SubscriptionKey, Arc<SubscriptionHandle>>>,
    stamps: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl SubscriptionManager {
    /// Channels opened by this manager deliver into `sink` and stop when
    /// `parent` is cancelled.
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        settings: SubscriptionSettings,
        sink: mpsc::Sender<FeedSignal>,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            feed,
            settings,
            sink,
            handles: Mutex::new(HashMap::new()),
            stamps: Arc::new(AtomicU64::new(0)),
            cancel: parent.child_token(),
        }
    }

    /// Opens a channel, or returns the live handle already open for the pair.
    ///
    /// Waits for the handshake acknowledgement, retrying with backoff up to
    /// `handshake_attempts` times before failing with [`SubscriptionError`].
    pub async fn open(
        &self,
        entity: EntityKind,
        filter: Filter,
    ) -> Result<Arc<SubscriptionHandle>, SubscriptionError> {
        let key = SubscriptionKey { entity, filter };
        let handle = {
            let mut handles = self.handles.lock().await;
            if let Some(existing) = handles.get(&key)
                && !existing.is_closed()
            {
                debug!(entity = %key.entity, filter = %key.filter, "reusing open subscription");
                return Ok(Arc::clone(existing));
            }
            let handle = Arc::new(SubscriptionHandle::new(key.clone(), self.cancel.child_token()));
            handles.insert(key.clone(), Arc::clone(&handle));
            handle
        };

        match self.handshake(&handle).await {
            Ok(stream) => {
                handle.state.mark_subscribed();
                info!(entity = %key.entity, filter = %key.filter, "subscribed to change feed");
                let pump = Pump {
                    feed: Arc::clone(&self.feed),
                    key: key.clone(),
                    state: Arc::clone(&handle.state),
                    settings: self.settings.clone(),
                    sink: self.sink.clone(),
                    stamps: Arc::clone(&self.stamps),
                    cancel: handle.cancel.clone(),
                };
                handle.attach(tokio::spawn(pump.run(stream)));
                Ok(handle)
            }
            Err(err) => {
                handle.state.set_status(SubscriptionStatus::Closed);
                let mut handles = self.handles.lock().await;
                if handles.get(&key).is_some_and(|h| Arc::ptr_eq(h, &handle)) {
                    handles.remove(&key);
                }
                error!(entity = %key.entity, filter = %key.filter, error = %err, "subscription handshake exhausted");
                Err(err)
            }
        }
    }

    /// Closes a handle opened by this manager. Idempotent.
    pub async fn close(&self, handle: &SubscriptionHandle) {
        handle.close().await;
        let mut handles = self.handles.lock().await;
        if handles
            .get(handle.key())
            .is_some_and(|h| std::ptr::eq(Arc::as_ptr(h), handle))
        {
            handles.remove(handle.key());
        }
    }

    pub async fn close_all(&self) {
        let handles: Vec<_> = self.handles.lock().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.close().await;
        }
    }

    pub async fn handles(&self) -> Vec<Arc<SubscriptionHandle>> {
        self.handles.lock().await.values().cloned().collect()
    }

    async fn handshake(&self, handle: &SubscriptionHandle) -> Result<RawChangeStream, SubscriptionError> {
        let key = &handle.key;
        let max_attempts = self.settings.handshake_attempts.max(1);
        let mut backoff = self.settings.backoff.start();
        let mut attempts = 0;
        let mut last_error = None;

        while attempts < max_attempts {
            attempts += 1;
            let result = tokio::select! {
                biased;
                _ = handle.cancel.cancelled() => {
                    last_error = Some("closed before the handshake completed".to_string());
                    break;
                }
                result = self.feed.subscribe(key.entity, &key.filter) => result,
            };
            let err = match result {
                Ok(stream) => return Ok(stream),
                Err(err) => err,
            };
            handle.state.record_failure(attempts, &err.message);
            warn!(
                entity = %key.entity,
                filter = %key.filter,
                attempt = attempts,
                max_attempts,
                error = %err,
                "subscription handshake failed"
            );
            last_error = Some(err.message);
            if attempts < max_attempts {
                let delay = backoff.next_delay();
                tokio::select! {
                    biased;
                    _ = handle.cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(SubscriptionError {
            entity: key.entity,
            filter: key.filter.clone(),
            attempts,
            last_error,
        })
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Forwards one channel's changes and resubscribes after drops.
struct Pump {
    feed: Arc<dyn ChangeFeed>,
    key: SubscriptionKey,
    state: Arc<HandleState>,
    settings: SubscriptionSettings,
    sink: mpsc::Sender<FeedSignal>,
    stamps: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl Pump {
    async fn run(self, mut stream: RawChangeStream) {
        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                item = stream.next() => item,
            };
            let dropped = match item {
                Some(Ok(raw)) => {
                    let received_at = ReceiptStamp(self.stamps.fetch_add(1, Ordering::Relaxed) + 1);
                    let delivery = Delivery {
                        entity: self.key.entity,
                        raw,
                        received_at,
                    };
                    if !self.deliver(FeedSignal::Change(delivery)).await {
                        break;
                    }
                    continue;
                }
                Some(Err(err)) => err,
                None => TransportError::new("change stream ended"),
            };
            match self.reconnect(dropped).await {
                Some(next) => stream = next,
                None => break,
            }
            if !self.deliver(FeedSignal::Resubscribed).await {
                break;
            }
        }
        self.state.set_status(SubscriptionStatus::Closed);
        debug!(entity = %self.key.entity, filter = %self.key.filter, "change pump stopped");
    }

    /// Sends into the inbox, waiting for room. False once the owner is gone.
    async fn deliver(&self, signal: FeedSignal) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.sink.send(signal) => sent.is_ok(),
        }
    }

    async fn reconnect(&self, cause: TransportError) -> Option<RawChangeStream> {
        let key = &self.key;
        warn!(entity = %key.entity, filter = %key.filter, error = %cause, "change feed dropped, resubscribing");
        *lock(&self.state.last_error) = Some(cause.message);
        self.state.set_status(SubscriptionStatus::Degraded);

        let mut backoff = self.settings.backoff.start();
        loop {
            let attempt = backoff.attempts() + 1;
            let delay = backoff.next_delay();
            self.state.retry_count.store(attempt, Ordering::Relaxed);
            debug!(entity = %key.entity, attempt, delay_ms = delay.as_millis() as u64, "waiting to resubscribe");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                result = self.feed.subscribe(key.entity, &key.filter) => result,
            };
            let err = match result {
                Ok(stream) => {
                    self.state.mark_subscribed();
                    info!(entity = %key.entity, filter = %key.filter, attempts = attempt, "change feed resubscribed");
                    return Some(stream);
                }
                Err(err) => err,
            };
            self.state.record_failure(attempt, &err.message);
            warn!(entity = %key.entity, filter = %key.filter, attempt, error = %err, "resubscribe failed");

            if self
                .settings
                .max_reconnect_attempts
                .is_some_and(|max| attempt >= max)
            {
                let fatal = SubscriptionError {
                    entity: key.entity,
                    filter: key.filter.clone(),
                    attempts: attempt,
                    last_error: Some(err.message),
                };
                error!(entity = %key.entity, filter = %key.filter, error = %fatal, "giving up on change feed");
                self.deliver(FeedSignal::Fatal(fatal)).await;
                return None;
            }
        }
    }
}
