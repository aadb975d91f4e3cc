//! Generic driver tests against a real database file.

mod common;

use bytes::Bytes;
use common::{open_driver, open_driver_with, test_config};
use kinestore::core::error::StoreError;
use kinestore::mvcc::Event;
use kinestore::ops::observability::StoreMetrics;
use kinestore::storage::schema::op;
use kinestore::storage::{Dialect, Engine, GenericDriver, NewRow, COMPACT_REV_KEY};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn create(name: &str, value: &str) -> NewRow {
    NewRow {
        name: name.to_string(),
        created: true,
        value: Bytes::from(value.to_string()),
        ..NewRow::default()
    }
}

fn update(name: &str, value: &str, prev_revision: i64, old_value: &str) -> NewRow {
    NewRow {
        name: name.to_string(),
        create_revision: 1,
        prev_revision,
        value: Bytes::from(value.to_string()),
        old_value: Bytes::from(old_value.to_string()),
        ..NewRow::default()
    }
}

// ============================================================================
// History reads
// ============================================================================

#[tokio::test]
async fn history_reads_by_revision() {
    let t = open_driver().await;
    let d = &t.driver;

    assert_eq!(d.insert(create("foo", "v1")).await.unwrap(), 1);
    assert_eq!(d.insert(update("foo", "v2", 1, "v1")).await.unwrap(), 2);

    let current = d.list_current("foo", 0, false).await.unwrap();
    assert_eq!(current.rows.len(), 1);
    assert_eq!(current.rows[0].value, Bytes::from_static(b"v2"));
    assert_eq!(current.current_revision, 2);

    let historical = d.list("foo", "", 0, 1, false).await.unwrap();
    assert_eq!(historical.rows.len(), 1);
    assert_eq!(historical.rows[0].value, Bytes::from_static(b"v1"));
    assert_eq!(historical.rows[0].id, 1);
}

#[tokio::test]
async fn tombstones_hidden_unless_requested() {
    let t = open_driver().await;
    let d = &t.driver;

    d.insert(create("foo", "v1")).await.unwrap();
    d.insert(update("foo", "v2", 1, "v1")).await.unwrap();
    let tombstone = NewRow {
        deleted: true,
        ..update("foo", "v2", 2, "v2")
    };
    assert_eq!(d.insert(tombstone).await.unwrap(), 3);

    assert!(d.list_current("foo", 0, false).await.unwrap().rows.is_empty());

    let with_deleted = d.list_current("foo", 0, true).await.unwrap();
    assert_eq!(with_deleted.rows.len(), 1);
    assert_eq!(with_deleted.rows[0].id, 3);
    assert!(with_deleted.rows[0].deleted);
}

#[tokio::test]
async fn insert_then_get_revision_round_trip() {
    let t = open_driver().await;
    let d = &t.driver;

    let first = d.insert(create("/registry/a", "one")).await.unwrap();
    let second = d
        .insert(update("/registry/a", "two", first, "one"))
        .await
        .unwrap();

    let row = d
        .get_revision(second)
        .await
        .unwrap()
        .rows
        .into_iter()
        .next()
        .unwrap();
    let event = Event::from(row);
    assert_eq!(event.kv.key, "/registry/a");
    assert_eq!(event.kv.value, Bytes::from_static(b"two"));
    assert_eq!(event.kv.mod_revision, second);
    let prev = event.prev_kv.unwrap();
    assert_eq!(prev.mod_revision, first);
    assert_eq!(prev.value, Bytes::from_static(b"one"));

    let created = Event::from(
        d.get_revision(first).await.unwrap().rows.remove(0),
    );
    assert!(created.create);
    assert!(created.prev_kv.is_none());
    assert_eq!(created.kv.create_revision, first);
}

#[tokio::test]
async fn directory_listing_resumes_from_start_key() {
    let t = open_driver().await;
    let d = &t.driver;
    for key in ["/a/1", "/a/2", "/a/3", "/b/1", "/a"] {
        d.insert(create(key, "x")).await.unwrap();
    }

    let all = d.list_current("/a/", 0, false).await.unwrap();
    let names: Vec<_> = all.rows.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["/a/1", "/a/2", "/a/3"]);

    let limited = d.list_current("/a/", 2, false).await.unwrap();
    assert_eq!(limited.rows.len(), 2);

    let resumed = d.list("/a/", "/a/2", 0, 5, false).await.unwrap();
    let names: Vec<_> = resumed.rows.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["/a/2", "/a/3"]);
}

#[tokio::test]
async fn count_and_current_revision() {
    let t = open_driver().await;
    let d = &t.driver;
    assert_eq!(d.current_revision().await.unwrap(), 0);

    d.insert(create("/k/1", "x")).await.unwrap();
    d.insert(create("/k/2", "x")).await.unwrap();
    let tombstone = NewRow {
        deleted: true,
        ..update("/k/1", "x", 1, "x")
    };
    d.insert(tombstone).await.unwrap();

    assert_eq!(d.count("/k/", 0).await.unwrap(), (3, 1));
    assert_eq!(d.count("/k/", 2).await.unwrap(), (3, 2));
    assert_eq!(d.current_revision().await.unwrap(), 3);
}

#[tokio::test]
async fn after_returns_rows_in_revision_order() {
    let t = open_driver().await;
    let d = &t.driver;
    for key in ["/x/b", "/y/a", "/x/a"] {
        d.insert(create(key, "v")).await.unwrap();
    }

    let ids: Vec<_> = d.after(1, 0).await.unwrap().rows.iter().map(|r| r.id).collect();
    assert_eq!(ids, [2, 3]);

    let ids: Vec<_> = d
        .after_prefix("/x/", 0, 0)
        .await
        .unwrap()
        .rows
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, [1, 3]);
}

// ============================================================================
// Point operations
// ============================================================================

#[tokio::test]
async fn fill_writes_placeholder_at_exact_revision() {
    let t = open_driver().await;
    let d = &t.driver;
    d.insert(create("/k", "v")).await.unwrap();

    d.fill(5).await.unwrap();
    let row = d.get_revision(5).await.unwrap().rows.remove(0);
    assert_eq!(row.name, "gap-5");
    assert!(row.deleted);
    assert!(!row.created);
    assert!(d.is_fill(&row.name));
    assert!(!d.is_fill("/k"));

    // Ids continue above the placeholder.
    assert_eq!(d.insert(create("/k2", "v")).await.unwrap(), 6);

    // The same revision cannot be filled twice.
    assert!(matches!(
        d.fill(5).await,
        Err(StoreError::KeyExists { op: "fill" })
    ));
}

#[tokio::test]
async fn duplicate_version_is_key_exists() {
    let t = open_driver().await;
    let d = &t.driver;
    d.insert(create("foo", "v1")).await.unwrap();
    let err = d.insert(create("foo", "again")).await.unwrap_err();
    assert!(matches!(err, StoreError::KeyExists { op: "insert" }));
}

#[tokio::test]
async fn compact_revision_round_trip() {
    let t = open_driver().await;
    let d = &t.driver;
    assert_eq!(d.get_compact_revision().await.unwrap(), (0, 0));

    d.insert(create(COMPACT_REV_KEY, "")).await.unwrap();
    d.insert(create("/k", "v")).await.unwrap();
    d.set_compact_revision(2).await.unwrap();
    assert_eq!(d.get_compact_revision().await.unwrap(), (2, 2));

    d.delete_revision(2).await.unwrap();
    assert!(d.get_revision(2).await.unwrap().rows.is_empty());
}

#[tokio::test]
async fn compact_revision_needs_sentinel() {
    let t = open_driver().await;
    let d = &t.driver;
    d.insert(create("/k", "v")).await.unwrap();

    let err = d.set_compact_revision(1).await.unwrap_err();
    assert!(matches!(err, StoreError::Database { op: "update_compact", .. }));
    assert_eq!(d.get_compact_revision().await.unwrap(), (0, 1));
}

#[tokio::test]
async fn database_size_is_reported() {
    let t = open_driver().await;
    t.driver.insert(create("/k", "v")).await.unwrap();
    assert!(t.driver.get_size().await.unwrap() > 0);
}

#[tokio::test]
async fn last_insert_id_path() {
    let t = open_driver_with(|c| c.database.last_insert_id = true).await;
    let d = &t.driver;
    assert!(d.engine().last_insert_id);

    assert_eq!(d.insert(create("/k/1", "v")).await.unwrap(), 1);
    assert_eq!(d.insert(create("/k/2", "v")).await.unwrap(), 2);
    assert_eq!(
        t.metrics.registry().counter_get(
            "kine.sql.operation_result_total.insert_last_insert_id.success"
        ),
        2
    );
}

// ============================================================================
// Admission, metrics, open
// ============================================================================

#[tokio::test]
async fn denied_call_issues_no_sql() {
    let t = open_driver_with(|c| {
        c.admission.policy = "limit".to_string();
        c.admission.max_concurrent = 1;
    })
    .await;
    let d = &t.driver;

    let held = d.admission().admit(op::GET_SIZE).unwrap();
    let err = d.insert(create("/k", "v")).await.unwrap_err();
    assert!(err.is_denied());
    assert!(err.to_string().starts_with("denied: "));
    drop(held);

    assert_eq!(d.current_revision().await.unwrap(), 0);
    assert_eq!(
        t.metrics
            .registry()
            .counter_get("kine.sql.transaction_result_total.insert.success"),
        0
    );
}

#[tokio::test]
async fn calls_record_operation_metrics() {
    let t = open_driver().await;
    t.driver.insert(create("/k", "v")).await.unwrap();
    t.driver.insert(create("/k", "v")).await.unwrap_err();

    let r = t.metrics.registry();
    assert_eq!(
        r.counter_get("kine.sql.operation_result_total.insert.success"),
        1
    );
    assert_eq!(r.counter_get("kine.sql.operation_result_total.insert.fail"), 1);
    assert_eq!(
        r.histogram_get("kine.sql.operation_latency_ms.insert")
            .unwrap()
            .count,
        2
    );
    assert_eq!(t.metrics.in_flight(op::INSERT), 0);
}

#[tokio::test]
async fn busy_database_exhausts_retries() {
    let t = open_driver_with(|c| {
        c.database.busy_timeout_ms = 1;
        c.database.max_retries = 3;
    })
    .await;
    let holder = rusqlite::Connection::open(&t.config.database.path).unwrap();
    holder.execute_batch("BEGIN EXCLUSIVE").unwrap();

    let err = t.driver.insert(create("/k", "v")).await.unwrap_err();
    assert!(
        matches!(err, StoreError::RetriesExhausted { op: "insert", attempts: 3, .. }),
        "unexpected error: {err}"
    );
    assert!(err.is_retriable());

    let r = t.metrics.registry();
    assert_eq!(r.counter_get("kine.sql.transaction_result_total.insert.fail"), 3);
    assert_eq!(r.counter_get("kine.sql.operation_result_total.insert.fail"), 1);

    holder.execute_batch("COMMIT").unwrap();
    assert_eq!(t.driver.insert(create("/k", "v")).await.unwrap(), 1);
}

#[tokio::test]
async fn insert_succeeds_once_lock_clears() {
    let t = open_driver_with(|c| c.database.busy_timeout_ms = 1).await;
    let holder = rusqlite::Connection::open(&t.config.database.path).unwrap();
    holder.execute_batch("BEGIN EXCLUSIVE").unwrap();
    let release = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        holder.execute_batch("COMMIT").unwrap();
    });

    assert_eq!(t.driver.insert(create("/k", "v")).await.unwrap(), 1);
    release.await.unwrap();

    let r = t.metrics.registry();
    assert!(r.counter_get("kine.sql.transaction_result_total.insert.fail") >= 1);
    assert_eq!(r.counter_get("kine.sql.transaction_result_total.insert.success"), 1);
    assert_eq!(r.counter_get("kine.sql.operation_result_total.insert.success"), 1);
}

#[tokio::test]
async fn open_gives_up_after_bounded_attempts() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    // A directory is not a database.
    config.database.path = dir.path().display().to_string();
    config.database.open_attempts = 2;

    let err = GenericDriver::open(
        &config,
        Engine::sqlite(),
        Arc::new(StoreMetrics::new()),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, StoreError::Unavailable { .. }));
}

#[tokio::test]
async fn open_is_cancellable() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.database.path = dir.path().display().to_string();
    config.database.open_attempts = 300;
    config.database.open_retry_interval_ms = 60_000;

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        GenericDriver::open(&config, Engine::sqlite(), Arc::new(StoreMetrics::new()), &cancel),
    )
    .await
    .expect("open did not observe cancellation")
    .unwrap_err();
    assert!(matches!(err, StoreError::Cancelled));
}
