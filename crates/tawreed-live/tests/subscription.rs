// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Change-feed lifecycle: handshake, reconnect, fatal loss and fallback.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tawreed_core::{EntityKind, Filter, RawChange, Severity, SubscriptionStatus};
use tawreed_live::{FeedSignal, LIVE_UNAVAILABLE, SubscriptionManager, SubscriptionSettings};
use tawreed_resilience::BackoffPolicy;
use tawreed_test_utils::{MockBackend, TestHarness, eventually};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn quick_settings(handshake_attempts: u32) -> SubscriptionSettings {
    SubscriptionSettings {
        handshake_attempts,
        backoff: BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(40)),
        max_reconnect_attempts: None,
    }
}

#[tokio::test(start_paused = true)]
async fn open_is_idempotent_and_close_is_repeatable() {
    let backend = Arc::new(MockBackend::new());
    let (tx, _rx) = mpsc::channel(8);
    let parent = CancellationToken::new();
    let manager = SubscriptionManager::new(backend.clone(), quick_settings(3), tx, &parent);

    let first = manager.open(EntityKind::Request, Filter::All).await.unwrap();
    let again = manager.open(EntityKind::Request, Filter::All).await.unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(backend.subscribe_calls().await, 1);
    assert_eq!(first.status(), SubscriptionStatus::Subscribed);

    let scoped = manager
        .open(EntityKind::Request, Filter::eq("client_id", "c1"))
        .await
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &scoped));
    assert_eq!(manager.handles().await.len(), 2);

    manager.close(&first).await;
    manager.close(&first).await;
    assert!(first.is_closed());
    assert_eq!(manager.handles().await.len(), 1);

    let reopened = manager.open(EntityKind::Request, Filter::All).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &reopened));
    manager.close_all().await;
    assert!(scoped.is_closed() && reopened.is_closed());
}

#[tokio::test(start_paused = true)]
async fn handshake_retries_then_fails_with_subscription_error() {
    let backend = Arc::new(MockBackend::new());
    backend.fail_next_subscribes(10).await;
    let (tx, _rx) = mpsc::channel(8);
    let parent = CancellationToken::new();
    let manager = SubscriptionManager::new(backend.clone(), quick_settings(4), tx, &parent);

    let err = manager.open(EntityKind::Offer, Filter::All).await.unwrap_err();
    assert_eq!(err.attempts, 4);
    assert_eq!(err.entity, EntityKind::Offer);
    assert_eq!(err.last_error.as_deref(), Some("handshake refused"));
    assert_eq!(backend.subscribe_calls().await, 4);
    assert!(manager.handles().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn handshake_succeeds_after_transient_refusals() {
    let backend = Arc::new(MockBackend::new());
    backend.fail_next_subscribes(2).await;
    let (tx, mut rx) = mpsc::channel(8);
    let parent = CancellationToken::new();
    let manager = SubscriptionManager::new(backend.clone(), quick_settings(5), tx, &parent);

    let handle = manager.open(EntityKind::Message, Filter::All).await.unwrap();
    assert_eq!(handle.status(), SubscriptionStatus::Subscribed);
    assert_eq!(handle.retry_count(), 0);

    backend
        .emit(EntityKind::Message, RawChange::insert(json!({"id": "m1"})))
        .await;
    match rx.recv().await {
        Some(FeedSignal::Change(delivery)) => {
            assert_eq!(delivery.entity, EntityKind::Message);
            assert_eq!(delivery.raw.event_type, "INSERT");
        }
        other => panic!("expected a change, got {other:?}"),
    }
    manager.close_all().await;
}

#[tokio::test(start_paused = true)]
async fn dropped_transport_degrades_then_resubscribes() {
    let harness = TestHarness::builder().build().await;
    let requests = harness.mount_ready(EntityKind::Request).await;
    let handle = requests.subscription().unwrap();
    let mut status = handle.watch_status();

    harness.backend.fail_next_subscribes(2).await;
    harness.backend.drop_connections().await;

    status.changed().await.unwrap();
    assert_eq!(*status.borrow_and_update(), SubscriptionStatus::Degraded);
    status
        .wait_for(|s| *s == SubscriptionStatus::Subscribed)
        .await
        .unwrap();
    assert_eq!(harness.backend.subscribe_calls().await, 4);
    assert_eq!(handle.retry_count(), 0);

    harness
        .backend
        .emit(
            EntityKind::Request,
            RawChange::insert(json!({"id": "r1", "title": "after reconnect"})),
        )
        .await;
    eventually("event after reconnect", || requests.len() == 1).await;
    assert!(requests.live_error().is_none());
    assert!(harness.notifier.is_empty());
    requests.unmount().await;
    assert!(handle.is_closed());
}

#[tokio::test(start_paused = true)]
async fn exhausted_handshake_falls_back_to_polling() {
    let harness = TestHarness::builder().with_handshake_attempts(2).build().await;
    harness.backend.fail_next_subscribes(100).await;
    let requests = harness.mount(EntityKind::Request);

    eventually("live error", || requests.live_error().is_some()).await;
    assert_eq!(requests.live_error().as_deref(), Some(LIVE_UNAVAILABLE));
    assert!(requests.subscription().is_none());
    let notices = harness.notifier.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].title, "Live updates unavailable");
    assert_eq!(notices[0].severity, Severity::Error);

    harness
        .backend
        .seed(EntityKind::Request, [json!({"id": "r1", "title": "polled"})])
        .await;
    eventually("polled row", || requests.len() == 1).await;
    assert!(harness.backend.query_calls().await >= 2);
    requests.unmount().await;

    let calls = harness.backend.query_calls().await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(harness.backend.query_calls().await, calls);
}

#[tokio::test(start_paused = true)]
async fn resubscribe_refetches_changes_missed_while_down() {
    let harness = TestHarness::builder().build().await;
    let requests = harness.mount_ready(EntityKind::Request).await;
    let queries = harness.backend.query_calls().await;

    harness.backend.drop_connections().await;
    harness
        .backend
        .seed(
            EntityKind::Request,
            [json!({"id": "r9", "created_at": "2024-01-01T10:00:00Z"})],
        )
        .await;

    eventually("missed row", || requests.len() == 1).await;
    assert_eq!(requests.rows()[0].id.as_str(), "r9");
    assert!(harness.backend.query_calls().await > queries);
    assert!(requests.live_error().is_none());
    requests.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn bounded_reconnect_escalates_to_fatal_loss() {
    let harness = TestHarness::builder()
        .with_max_reconnect_attempts(3)
        .build()
        .await;
    let requests = harness.mount_ready(EntityKind::Request).await;
    let handle = requests.subscription().unwrap();

    harness.backend.fail_next_subscribes(100).await;
    harness.backend.drop_connections().await;

    eventually("fatal loss", || requests.live_error().is_some()).await;
    assert!(handle.is_closed());
    assert_eq!(handle.retry_count(), 3);
    assert_eq!(harness.notifier.titles(), vec!["Live updates unavailable"]);
    requests.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn dropping_a_collection_closes_its_channel() {
    let harness = TestHarness::builder().build().await;
    let requests = harness.mount_ready(EntityKind::Request).await;
    assert_eq!(harness.backend.open_channels().await, 1);

    drop(requests);
    wait_for_no_open_channels(&harness).await;
}

async fn wait_for_no_open_channels(harness: &TestHarness) {
    for _ in 0..200 {
        if harness.backend.open_channels().await == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("channel still open after drop");
}
