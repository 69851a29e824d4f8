// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests of live collections against the in-memory backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Map, Value, json};
use tawreed_core::{
    ActorIdentity, ActorRole, EntityId, EntityKind, RawChange, RemoteWriteError, Severity,
    TawreedError,
};
use tawreed_live::{ChangeTag, parse_timestamp};
use tawreed_test_utils::{TestHarness, eventually};

fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

fn id(s: &str) -> EntityId {
    EntityId::new(s)
}

fn ids(rows: &[tawreed_core::Row]) -> Vec<&str> {
    rows.iter().map(|r| r.id.as_str()).collect()
}

#[tokio::test(start_paused = true)]
async fn insert_then_partial_update_merges_into_the_row() {
    let harness = TestHarness::builder().build().await;
    let requests = harness.mount_ready(EntityKind::Request).await;

    harness
        .backend
        .emit(
            EntityKind::Request,
            RawChange::insert(json!({
                "id": "r1",
                "created_at": "2024-01-01T10:00:00Z",
                "title": "Audio gear"
            })),
        )
        .await;
    eventually("r1 to be inserted", || requests.len() == 1).await;

    harness
        .backend
        .emit(
            EntityKind::Request,
            RawChange::update(json!({"id": "r1", "title": "Audio gear v2"}), None),
        )
        .await;
    eventually("r1 to be updated", || {
        requests
            .get(&id("r1"))
            .is_some_and(|r| r.get_str("title") == Some("Audio gear v2"))
    })
    .await;

    let rows = requests.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].created_at, parse_timestamp("2024-01-01T10:00:00Z"));
    requests.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn inserts_are_ordered_newest_first_regardless_of_arrival() {
    let harness = TestHarness::builder().build().await;
    let requests = harness.mount_ready(EntityKind::Request).await;

    for (row_id, created) in [("r1", "2024-01-01T10:00:00Z"), ("r2", "2024-01-01T10:05:00Z")] {
        harness
            .backend
            .emit(
                EntityKind::Request,
                RawChange::insert(json!({"id": row_id, "created_at": created})),
            )
            .await;
    }
    eventually("both rows", || requests.len() == 2).await;
    assert_eq!(ids(&requests.rows()), vec!["r2", "r1"]);
    requests.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn rows_with_only_identity_and_sort_key_are_kept() {
    let harness = TestHarness::builder()
        .with_rows(
            EntityKind::Offer,
            vec![json!({"id": "o1", "created_at": "2024-01-01T09:00:00Z"})],
        )
        .build()
        .await;
    let offers = harness.mount_ready(EntityKind::Offer).await;
    assert_eq!(ids(&offers.rows()), vec!["o1"]);

    harness
        .backend
        .emit(
            EntityKind::Offer,
            RawChange::insert(json!({"id": "o2", "created_at": "2024-01-01T10:00:00Z"})),
        )
        .await;
    eventually("o2 inserted", || offers.len() == 2).await;
    assert_eq!(ids(&offers.rows()), vec!["o2", "o1"]);
    offers.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn update_succeeds_for_rows_without_optional_columns() {
    let harness = TestHarness::builder()
        .with_rows(
            EntityKind::Request,
            vec![json!({"id": "r1", "created_at": "2024-01-01T10:00:00Z"})],
        )
        .build()
        .await;
    let requests = harness.mount_ready(EntityKind::Request).await;

    let written = requests
        .update(&id("r1"), fields(json!({"status": "closed"})))
        .await
        .unwrap();
    assert_eq!(written.id.as_str(), "r1");
    assert_eq!(written.get_str("status"), Some("closed"));
    assert!(written.updated_at.is_some());

    eventually("update confirmed", || requests.snapshot().pending == 0).await;
    assert_eq!(requests.get(&id("r1")).unwrap().get_str("status"), Some("closed"));
    assert!(harness.notifier.is_empty());
    requests.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn create_with_unreadable_response_still_learns_the_server_id() {
    let harness = TestHarness::builder().build().await;
    harness.backend.set_echo(false).await;
    let requests = harness.mount_ready(EntityKind::Request).await;

    let written = requests
        .create(fields(json!({"title": "Odd", "created_at": "whenever"})))
        .await
        .unwrap();
    assert_eq!(written.id.as_str(), "srv-1");
    assert_eq!(requests.snapshot().pending, 1);
    assert!(requests.rows()[0].id.is_temporary());

    harness
        .backend
        .emit(
            EntityKind::Request,
            RawChange::insert(json!({
                "id": "srv-1",
                "created_at": "2024-01-01T10:00:00Z",
                "title": "Odd"
            })),
        )
        .await;
    eventually("confirmation", || requests.snapshot().pending == 0).await;
    assert_eq!(ids(&requests.rows()), vec!["srv-1"]);
    assert!(harness.notifier.is_empty());
    requests.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn optimistic_create_is_replaced_by_the_confirmed_row() {
    let harness = TestHarness::builder().build().await;
    harness.backend.set_echo(false).await;
    harness.backend.set_write_delay(Duration::from_millis(100)).await;
    let requests = harness.mount_ready(EntityKind::Request).await;

    let create = requests.create(fields(json!({"title": "New"})));
    let observed = async {
        eventually("temporary row", || requests.len() == 1).await;
        requests.rows()
    };
    let (written, seen) = tokio::join!(create, observed);

    assert!(seen[0].id.is_temporary());
    assert_eq!(seen[0].get_str("title"), Some("New"));
    let written = written.unwrap();
    assert_eq!(written.id.as_str(), "srv-1");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests.snapshot().pending, 1);

    let stored = harness.backend.rows(EntityKind::Request).await;
    harness
        .backend
        .emit(EntityKind::Request, RawChange::insert(Value::Object(stored[0].clone())))
        .await;
    eventually("confirmation", || requests.snapshot().pending == 0).await;

    let rows = requests.rows();
    assert_eq!(ids(&rows), vec!["srv-1"]);
    assert_eq!(rows[0].get_str("title"), Some("New"));
    requests.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn echoed_create_confirms_without_duplicates() {
    let harness = TestHarness::builder().build().await;
    let requests = harness.mount_ready(EntityKind::Request).await;

    let written = requests.create(fields(json!({"title": "Desk"}))).await.unwrap();
    eventually("confirmation", || requests.snapshot().pending == 0).await;

    assert_eq!(ids(&requests.rows()), vec![written.id.as_str()]);
    requests.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn rejected_create_restores_the_collection_and_notifies() {
    let harness = TestHarness::builder()
        .with_rows(
            EntityKind::Request,
            vec![json!({"id": "r1", "created_at": "2024-01-01T10:00:00Z", "title": "Chairs"})],
        )
        .build()
        .await;
    let requests = harness.mount_ready(EntityKind::Request).await;
    let before = requests.rows();

    harness
        .backend
        .fail_next_write(RemoteWriteError::rejected("title too short"))
        .await;
    let err = requests
        .create(fields(json!({"title": "x"})))
        .await
        .unwrap_err();

    assert!(matches!(err, TawreedError::RemoteWrite(_)));
    assert_eq!(requests.rows(), before);
    assert_eq!(requests.snapshot().pending, 0);
    let notices = harness.notifier.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].title, "Change was not accepted");
    assert_eq!(notices[0].severity, Severity::Error);
    requests.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn failed_update_and_delete_restore_the_previous_row() {
    let harness = TestHarness::builder()
        .with_rows(
            EntityKind::Request,
            vec![json!({"id": "r1", "created_at": "2024-01-01T10:00:00Z", "title": "Chairs"})],
        )
        .build()
        .await;
    let requests = harness.mount_ready(EntityKind::Request).await;
    let before = requests.rows();

    harness
        .backend
        .fail_next_write(RemoteWriteError::conflict("stale version"))
        .await;
    let err = requests
        .update(&id("r1"), fields(json!({"title": "Tables"})))
        .await
        .unwrap_err();
    assert!(matches!(err, TawreedError::RemoteWrite(e) if e.title() == "Someone else changed this first"));
    assert_eq!(requests.rows(), before);

    harness
        .backend
        .fail_next_write(RemoteWriteError::transient("timeout"))
        .await;
    assert!(requests.delete(&id("r1")).await.is_err());
    assert_eq!(requests.rows(), before);
    assert_eq!(harness.notifier.count(Severity::Error), 2);
    requests.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn confirmed_update_and_delete_clear_pending_patches() {
    let harness = TestHarness::builder()
        .with_rows(
            EntityKind::Request,
            vec![
                json!({"id": "r1", "created_at": "2024-01-01T10:00:00Z", "title": "Chairs", "status": "open"}),
                json!({"id": "r2", "created_at": "2024-01-01T09:00:00Z", "title": "Lamps"}),
            ],
        )
        .build()
        .await;
    let requests = harness.mount_ready(EntityKind::Request).await;
    assert_eq!(requests.len(), 2);

    let updated = requests
        .update(&id("r1"), fields(json!({"status": "closed"})))
        .await
        .unwrap();
    assert_eq!(updated.get_str("status"), Some("closed"));
    requests.delete(&id("r2")).await.unwrap();
    eventually("confirmations", || requests.snapshot().pending == 0).await;

    let rows = requests.rows();
    assert_eq!(ids(&rows), vec!["r1"]);
    assert_eq!(rows[0].get_str("status"), Some("closed"));
    assert_eq!(rows[0].get_str("title"), Some("Chairs"));
    // Our own writes are not announced back to us.
    assert!(harness.notifier.is_empty());
    requests.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_change_is_reverted_after_the_timeout() {
    let harness = TestHarness::builder()
        .with_optimistic_timeout(Duration::from_secs(2))
        .build()
        .await;
    harness.backend.set_echo(false).await;
    let requests = harness.mount_ready(EntityKind::Request).await;

    requests.create(fields(json!({"title": "Ghost"}))).await.unwrap();
    assert_eq!(requests.len(), 1);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(requests.len(), 1);

    eventually("timeout revert", || requests.is_empty()).await;
    assert_eq!(requests.snapshot().pending, 0);
    assert_eq!(harness.notifier.titles(), vec!["Change not confirmed"]);
    requests.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn writes_to_the_same_row_are_serialized() {
    let harness = TestHarness::builder()
        .with_rows(
            EntityKind::Request,
            vec![json!({"id": "r1", "created_at": "2024-01-01T10:00:00Z", "title": "v0"})],
        )
        .build()
        .await;
    harness.backend.set_write_delay(Duration::from_millis(200)).await;
    let requests = harness.mount_ready(EntityKind::Request).await;

    let r1_first = id("r1");
    let r1_second = id("r1");
    let first = requests.update(&r1_first, fields(json!({"title": "v1"})));
    let second = requests.update(&r1_second, fields(json!({"title": "v2"})));
    let observed = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let row = requests.get(&id("r1")).unwrap();
        (row.get_str("title").map(str::to_string), requests.snapshot().pending)
    };
    let (first, second, (title_mid_flight, pending_mid_flight)) = tokio::join!(first, second, observed);

    assert_eq!(title_mid_flight.as_deref(), Some("v1"));
    assert_eq!(pending_mid_flight, 1);
    assert_eq!(first.unwrap().get_str("title"), Some("v1"));
    assert_eq!(second.unwrap().get_str("title"), Some("v2"));
    eventually("final title", || {
        requests
            .get(&id("r1"))
            .is_some_and(|r| r.get_str("title") == Some("v2"))
    })
    .await;
    requests.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn writes_to_unconfirmed_or_missing_rows_are_refused() {
    let harness = TestHarness::builder().build().await;
    let requests = harness.mount_ready(EntityKind::Request).await;

    let err = requests
        .update(&id("tmp-123"), fields(json!({"title": "x"})))
        .await
        .unwrap_err();
    assert!(matches!(err, TawreedError::Unconfirmed { .. }));

    let err = requests.delete(&id("nope")).await.unwrap_err();
    assert!(matches!(err, TawreedError::NotFound { .. }));
    assert!(harness.notifier.is_empty());
    requests.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn update_for_an_unknown_row_is_treated_as_insert() {
    let harness = TestHarness::builder().build().await;
    let requests = harness.mount_ready(EntityKind::Request).await;

    harness
        .backend
        .emit(
            EntityKind::Request,
            RawChange::update(json!({"id": "r7", "title": "Early bird"}), None),
        )
        .await;
    eventually("r7 present", || requests.len() == 1).await;
    assert_eq!(requests.get(&id("r7")).unwrap().get_str("title"), Some("Early bird"));
    requests.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_events_are_dropped_without_side_effects() {
    let harness = TestHarness::builder().build().await;
    let requests = harness.mount_ready(EntityKind::Request).await;

    harness
        .backend
        .emit(EntityKind::Request, RawChange::insert(json!({"title": "no id"})))
        .await;
    harness
        .backend
        .emit(
            EntityKind::Request,
            RawChange::insert(json!({"id": "r1", "created_at": "yesterday"})),
        )
        .await;
    harness
        .backend
        .emit(EntityKind::Request, RawChange::insert(json!({"id": "r2", "title": "ok"})))
        .await;

    eventually("valid row", || requests.len() == 1).await;
    assert_eq!(ids(&requests.rows()), vec!["r2"]);
    assert!(harness.notifier.is_empty());
    requests.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn remote_deletes_stay_deleted() {
    let harness = TestHarness::builder().build().await;
    let requests = harness.mount_ready(EntityKind::Request).await;

    harness
        .backend
        .emit(EntityKind::Request, RawChange::insert(json!({"id": "r1", "title": "a"})))
        .await;
    eventually("insert", || requests.len() == 1).await;
    harness
        .backend
        .emit(EntityKind::Request, RawChange::delete(json!({"id": "r1"})))
        .await;
    harness
        .backend
        .emit(EntityKind::Request, RawChange::delete(json!({"id": "r1"})))
        .await;
    harness
        .backend
        .emit(EntityKind::Request, RawChange::insert(json!({"id": "r1", "title": "a"})))
        .await;
    harness
        .backend
        .emit(EntityKind::Request, RawChange::insert(json!({"id": "r2", "title": "b"})))
        .await;

    eventually("r2", || requests.get(&id("r2")).is_some()).await;
    assert!(requests.get(&id("r1")).is_none());
    requests.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn initial_fetch_follows_pages_and_actor_scope() {
    let rows = (0..5)
        .map(|i| {
            json!({
                "id": format!("o{i}"),
                "request_id": "r1",
                "vendor_id": if i % 2 == 0 { "v1" } else { "v2" },
                "created_at": format!("2024-01-01T10:0{i}:00Z"),
            })
        })
        .collect();
    let harness = TestHarness::builder()
        .with_actor(ActorIdentity::new("v1", ActorRole::Vendor))
        .with_page_size(2)
        .with_rows(EntityKind::Offer, rows)
        .build()
        .await;
    let offers = harness.mount_ready(EntityKind::Offer).await;
    eventually("every page", || offers.len() == 3).await;
    assert_eq!(ids(&offers.rows()), vec!["o4", "o2", "o0"]);

    harness
        .backend
        .emit(
            EntityKind::Offer,
            RawChange::insert(json!({"id": "o9", "request_id": "r1", "vendor_id": "v2"})),
        )
        .await;
    harness
        .backend
        .emit(
            EntityKind::Offer,
            RawChange::insert(json!({"id": "o8", "request_id": "r1", "vendor_id": "v1"})),
        )
        .await;
    eventually("own offer", || offers.len() == 4).await;
    assert!(offers.get(&id("o9")).is_none());
    offers.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn failed_initial_fetch_stops_loading_and_notifies() {
    let harness = TestHarness::builder().build().await;
    harness.backend.fail_next_queries(1).await;
    let requests = harness.mount(EntityKind::Request);
    requests.wait_loaded().await;

    assert!(requests.is_empty());
    assert_eq!(harness.notifier.titles(), vec!["Could not load data"]);

    harness
        .backend
        .seed(EntityKind::Request, [json!({"id": "r1", "title": "late"})])
        .await;
    requests.refresh().await.unwrap();
    assert_eq!(requests.len(), 1);
    requests.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn remote_changes_are_announced_when_enabled() {
    let harness = TestHarness::builder().build().await;
    let offers = harness.mount_ready(EntityKind::Offer).await;
    harness
        .backend
        .emit(
            EntityKind::Offer,
            RawChange::insert(json!({"id": "o1", "request_id": "r1", "price": 1500})),
        )
        .await;
    eventually("announcement", || !harness.notifier.is_empty()).await;
    let notice = &harness.notifier.notices()[0];
    assert_eq!(notice.title, "New offer");
    assert_eq!(notice.severity, Severity::Info);
    offers.unmount().await;

    let quiet = TestHarness::builder().with_announcements(false).build().await;
    let offers = quiet.mount_ready(EntityKind::Offer).await;
    quiet
        .backend
        .emit(
            EntityKind::Offer,
            RawChange::insert(json!({"id": "o1", "request_id": "r1"})),
        )
        .await;
    eventually("insert", || offers.len() == 1).await;
    assert!(quiet.notifier.is_empty());
    offers.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn listeners_see_changes_by_tag() {
    let harness = TestHarness::builder().build().await;
    let requests = harness.mount_ready(EntityKind::Request).await;
    let inserted = Arc::new(AtomicUsize::new(0));
    let everything = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&inserted);
    requests.on(Some(ChangeTag::Inserted), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let counter = Arc::clone(&everything);
    let all = requests.on(None, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    harness
        .backend
        .emit(EntityKind::Request, RawChange::insert(json!({"id": "r1", "title": "a"})))
        .await;
    harness
        .backend
        .emit(
            EntityKind::Request,
            RawChange::update(json!({"id": "r1", "title": "b"}), None),
        )
        .await;
    eventually("both changes", || everything.load(Ordering::SeqCst) == 2).await;
    assert_eq!(inserted.load(Ordering::SeqCst), 1);

    assert!(requests.off(all));
    assert!(!requests.off(all));
    requests.unmount().await;
}

#[tokio::test(start_paused = true)]
async fn writes_finishing_after_unmount_leave_no_trace() {
    let harness = TestHarness::builder()
        .with_rows(
            EntityKind::Request,
            vec![json!({"id": "r1", "created_at": "2024-01-01T10:00:00Z", "title": "Chairs"})],
        )
        .build()
        .await;
    harness.backend.set_write_delay(Duration::from_millis(300)).await;
    harness
        .backend
        .fail_next_write(RemoteWriteError::rejected("denied"))
        .await;
    let requests = harness.mount_ready(EntityKind::Request).await;

    let mutations = requests.mutations();
    let failing = tokio::spawn({
        let mutations = Arc::clone(&mutations);
        async move { mutations.update(&id("r1"), fields(json!({"title": "x"}))).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    requests.unmount().await;

    let result = failing.await.unwrap();
    assert!(matches!(result, Err(TawreedError::RemoteWrite(_))));
    assert!(harness.notifier.is_empty());

    let late = mutations
        .update(&id("r1"), fields(json!({"title": "y"})))
        .await
        .unwrap_err();
    assert!(matches!(late, TawreedError::Unmounted));
    assert_eq!(harness.backend.open_channels().await, 0);
}
