//! Integration tests for completion, failure, and retry accounting.

mod common;

use common::{memory_tracker, settings};
use enhancement_tracker::model::*;
use enhancement_tracker::{Error, Tracker};

async fn claimed(tracker: &Tracker, id: &str, worker: &str) -> WorkItem {
    let item = tracker.claim(worker, None).await.unwrap().unwrap();
    assert_eq!(item.id, ItemId::from(id));
    item
}

// ---------------------------------------------------------------------------
// Success
// ---------------------------------------------------------------------------

#[tokio::test]
async fn complete_marks_item_done_and_frees_worker() {
    let tracker = memory_tracker().await;
    tracker.register("a.rs", "x", PriorityTier::Normal).await.unwrap();
    let item = claimed(&tracker, "a.rs", "w1").await;

    let result = tracker
        .complete("w1", &item.id, Outcome::success())
        .await
        .unwrap();
    assert_eq!(result, Completion::Completed);

    let done = tracker.get(&item.id).await.unwrap();
    assert_eq!(done.status, Status::Completed);
    assert!(done.completed_at.is_some());
    assert_eq!(done.completed_by.as_deref(), Some("w1"));
    assert!(done.owner.is_none());
    assert!(done.claimed_at.is_none());

    let worker = tracker.worker("w1").await.unwrap().unwrap();
    assert_eq!(worker.status, WorkerStatus::Idle);
    assert!(worker.current_item.is_none());
    assert_eq!(worker.processed_count, 1);
    assert_eq!(worker.failed_count, 0);

    assert!(tracker.claim("w1", None).await.unwrap().is_none());
}

#[tokio::test]
async fn complete_applies_reclassification_and_audit() {
    let tracker = memory_tracker().await;
    tracker.register("a.rs", "x", PriorityTier::Urgent).await.unwrap();
    let item = claimed(&tracker, "a.rs", "w1").await;

    tracker
        .complete(
            "w1",
            &item.id,
            Outcome::success()
                .reclassify(PriorityTier::Low)
                .audit("rag", "enriched from keyword index")
                .audit("docs", "summary regenerated"),
        )
        .await
        .unwrap();

    let done = tracker.get(&item.id).await.unwrap();
    assert_eq!(done.priority_tier, PriorityTier::Low);

    let audit = tracker.audit_log(&item.id).await.unwrap();
    assert_eq!(audit.len(), 2);
    assert_eq!(audit[0].source, "rag");
    assert_eq!(audit[0].worker_id, "w1");
    assert_eq!(audit[1].description, "summary regenerated");
}

// ---------------------------------------------------------------------------
// Failure and retries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failure_returns_item_to_pending_with_error() {
    let tracker = memory_tracker().await;
    tracker.register("A", "x", PriorityTier::Normal).await.unwrap();
    let item = claimed(&tracker, "A", "w1").await;

    let result = tracker
        .complete("w1", &item.id, Outcome::failure("timeout"))
        .await
        .unwrap();
    assert_eq!(result, Completion::Retrying { retry_count: 1 });

    let after = tracker.get(&item.id).await.unwrap();
    assert_eq!(after.status, Status::Pending);
    assert_eq!(after.retry_count, 1);
    assert_eq!(after.last_error.as_deref(), Some("timeout"));
    assert!(after.owner.is_none());
    assert!(after.claimed_at.is_none());

    let worker = tracker.worker("w1").await.unwrap().unwrap();
    assert_eq!(worker.status, WorkerStatus::Idle);
    assert_eq!(worker.failed_count, 1);

    // Eligible again, including for the same worker.
    let again = tracker.claim("w1", None).await.unwrap().unwrap();
    assert_eq!(again.id, item.id);
}

#[tokio::test]
async fn item_fails_permanently_after_max_retries() {
    let tracker = memory_tracker().await;
    assert_eq!(tracker.settings().max_retries, 3);
    tracker.register("flaky", "x", PriorityTier::Normal).await.unwrap();

    for k in 1..=3u32 {
        let item = claimed(&tracker, "flaky", "w1").await;
        let result = tracker.fail("w1", &item.id, format!("error {k}")).await.unwrap();
        let stored = tracker.get(&item.id).await.unwrap();
        assert_eq!(stored.retry_count, k);
        if k < 3 {
            assert_eq!(result, Completion::Retrying { retry_count: k });
            assert_eq!(stored.status, Status::Pending);
        } else {
            assert_eq!(result, Completion::PermanentlyFailed { retry_count: 3 });
            assert_eq!(stored.status, Status::Failed);
            assert!(stored.completed_at.is_some());
        }
    }

    let failed = tracker.get(&ItemId::from("flaky")).await.unwrap();
    assert_eq!(failed.last_error.as_deref(), Some("error 3"));
    assert!(tracker.claim("w1", None).await.unwrap().is_none());
    assert!(tracker.claim("w2", Some("x")).await.unwrap().is_none());
}

#[tokio::test]
async fn configured_retry_limit_is_honored() {
    let tracker = Tracker::in_memory(enhancement_tracker::config::TrackerSettings {
        max_retries: 1,
        ..settings()
    })
    .await
    .unwrap();
    tracker.register("once", "x", PriorityTier::Normal).await.unwrap();

    let item = claimed(&tracker, "once", "w1").await;
    let result = tracker.fail("w1", &item.id, "nope").await.unwrap();
    assert_eq!(result, Completion::PermanentlyFailed { retry_count: 1 });
}

// ---------------------------------------------------------------------------
// Ownership
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_completion_is_rejected_as_not_owner() {
    let tracker = memory_tracker().await;
    tracker.register("a.rs", "x", PriorityTier::Normal).await.unwrap();
    let item = claimed(&tracker, "a.rs", "w1").await;

    tracker.complete("w1", &item.id, Outcome::success()).await.unwrap();
    let err = tracker
        .complete("w1", &item.id, Outcome::success())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotOwner { .. }), "got {err:?}");

    let worker = tracker.worker("w1").await.unwrap().unwrap();
    assert_eq!(worker.processed_count, 1);
}

#[tokio::test]
async fn stale_worker_cannot_touch_reclaimed_item() {
    let tracker = memory_tracker().await;
    tracker.register("B", "x", PriorityTier::Normal).await.unwrap();
    let item = claimed(&tracker, "B", "w1").await;

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    assert_eq!(tracker.reap_stale(std::time::Duration::ZERO).await.unwrap(), 1);
    let reclaimed = claimed(&tracker, "B", "w2").await;

    let err = tracker.fail("w1", &item.id, "late").await.unwrap_err();
    assert!(matches!(err, Error::NotOwner { .. }));

    let stored = tracker.get(&reclaimed.id).await.unwrap();
    assert_eq!(stored.owner.as_deref(), Some("w2"));
    assert_eq!(stored.status, Status::InProgress);
    assert_eq!(stored.retry_count, 0);
    assert!(stored.last_error.is_none());
}

#[tokio::test]
async fn completing_unknown_item_is_not_found() {
    let tracker = memory_tracker().await;
    let err = tracker
        .complete("w1", &ItemId::from("ghost"), Outcome::success())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn pending_item_cannot_be_completed_without_claim() {
    let tracker = memory_tracker().await;
    tracker.register("a.rs", "x", PriorityTier::Normal).await.unwrap();
    let err = tracker
        .fail("w1", &ItemId::from("a.rs"), "never claimed")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotOwner { .. }));
    assert_eq!(tracker.get(&ItemId::from("a.rs")).await.unwrap().retry_count, 0);
}

// ---------------------------------------------------------------------------
// work_once
// ---------------------------------------------------------------------------

#[tokio::test]
async fn work_once_runs_callback_between_claim_and_complete() {
    let tracker = memory_tracker().await;
    tracker.register("good.rs", "x", PriorityTier::Urgent).await.unwrap();
    tracker.register("bad.rs", "x", PriorityTier::Normal).await.unwrap();

    let worker = "w1";
    let done = tracker
        .work_once(worker, None, |item| async move {
            assert_eq!(item.status, Status::InProgress);
            Outcome::success().audit("test", format!("processed {}", item.id))
        })
        .await
        .unwrap();
    assert_eq!(done, Some((ItemId::from("good.rs"), Completion::Completed)));

    let failed = tracker
        .work_once(worker, None, |_| async { Outcome::failure("parse error") })
        .await
        .unwrap();
    assert_eq!(
        failed,
        Some((ItemId::from("bad.rs"), Completion::Retrying { retry_count: 1 }))
    );

    let audit = tracker.audit_log(&ItemId::from("good.rs")).await.unwrap();
    assert_eq!(audit[0].description, "processed good.rs");
}

#[tokio::test]
async fn work_once_returns_none_without_work() {
    let tracker = memory_tracker().await;
    let result = tracker
        .work_once("w1", None, |_| async { Outcome::success() })
        .await
        .unwrap();
    assert!(result.is_none());
}

// ---------------------------------------------------------------------------
// Bookkeeping after a committed transition
// ---------------------------------------------------------------------------

async fn drop_table(store: &common::TestStore, table: &str) {
    use sqlx::Connection;
    let mut conn = sqlx::SqliteConnection::connect(&store.url).await.unwrap();
    sqlx::query(&format!("ALTER TABLE {table} RENAME TO {table}_gone"))
        .execute(&mut conn)
        .await
        .unwrap();
    conn.close().await.unwrap();
}

#[tokio::test]
async fn claim_survives_worker_record_failure() {
    let store = common::TestStore::new();
    let tracker = store.open().await;
    tracker.register("A", "x", PriorityTier::Normal).await.unwrap();
    drop_table(&store, "workers").await;

    let item = tracker.claim("w1", None).await.unwrap().unwrap();
    assert_eq!(item.id, ItemId::from("A"));
    assert_eq!(item.owner.as_deref(), Some("w1"));

    // The claimer learned the id, so it can still finish the item.
    let result = tracker
        .complete("w1", &item.id, Outcome::success())
        .await
        .unwrap();
    assert_eq!(result, Completion::Completed);
    assert_eq!(tracker.get(&item.id).await.unwrap().status, Status::Completed);
}

#[tokio::test]
async fn completion_survives_audit_failure() {
    let store = common::TestStore::new();
    let tracker = store.open().await;
    tracker.register("A", "x", PriorityTier::Normal).await.unwrap();
    let item = claimed(&tracker, "A", "w1").await;
    drop_table(&store, "update_records").await;

    let result = tracker
        .complete("w1", &item.id, Outcome::success().audit("rag", "enriched"))
        .await
        .unwrap();
    assert_eq!(result, Completion::Completed);

    let done = tracker.get(&item.id).await.unwrap();
    assert_eq!(done.status, Status::Completed);
    assert_eq!(done.completed_by.as_deref(), Some("w1"));

    let worker = tracker.worker("w1").await.unwrap().unwrap();
    assert_eq!(worker.processed_count, 1);
}
