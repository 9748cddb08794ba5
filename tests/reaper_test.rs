//! Integration tests for stale-claim recovery.

mod common;

use common::{TestStore, memory_tracker};
use enhancement_tracker::{Error, Reaper};
use enhancement_tracker::model::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn crashed_worker_claim_returns_to_pending() {
    let tracker = memory_tracker().await;
    tracker.register("B", "x", PriorityTier::Normal).await.unwrap();
    let item = tracker.claim("w1", None).await.unwrap().unwrap();

    // w1 "crashes": no complete, no fail.
    tokio::time::sleep(Duration::from_millis(5)).await;
    let reset = tracker.reap_stale(Duration::ZERO).await.unwrap();
    assert_eq!(reset, 1);

    let stored = tracker.get(&item.id).await.unwrap();
    assert_eq!(stored.status, Status::Pending);
    assert_eq!(stored.retry_count, 0);
    assert!(stored.owner.is_none());
    assert!(stored.claimed_at.is_none());

    let again = tracker.claim("w2", None).await.unwrap().unwrap();
    assert_eq!(again.id, item.id);
    assert_eq!(again.owner.as_deref(), Some("w2"));
}

#[tokio::test]
async fn reaping_twice_is_a_no_op() {
    let tracker = memory_tracker().await;
    tracker.register("B", "x", PriorityTier::Normal).await.unwrap();
    tracker.claim("w1", None).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(tracker.reap_stale(Duration::ZERO).await.unwrap(), 1);
    assert_eq!(tracker.reap_stale(Duration::ZERO).await.unwrap(), 0);
}

#[tokio::test]
async fn fresh_claims_survive_default_timeout() {
    let tracker = memory_tracker().await;
    tracker.register("a", "x", PriorityTier::Normal).await.unwrap();
    tracker.register("b", "x", PriorityTier::Normal).await.unwrap();
    tracker.claim("w1", None).await.unwrap().unwrap();

    assert_eq!(tracker.reap_stale_default().await.unwrap(), 0);

    let claimed = tracker.get(&ItemId::from("a")).await.unwrap();
    assert_eq!(claimed.status, Status::InProgress);
    assert_eq!(claimed.owner.as_deref(), Some("w1"));
    let pending = tracker.get(&ItemId::from("b")).await.unwrap();
    assert_eq!(pending.status, Status::Pending);
}

#[tokio::test]
async fn reaper_leaves_terminal_items_alone() {
    let tracker = memory_tracker().await;
    tracker.register("done", "x", PriorityTier::Normal).await.unwrap();
    let item = tracker.claim("w1", None).await.unwrap().unwrap();
    tracker
        .complete("w1", &item.id, Outcome::success())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(tracker.reap_stale(Duration::ZERO).await.unwrap(), 0);
    assert_eq!(
        tracker.get(&item.id).await.unwrap().status,
        Status::Completed
    );
}

#[tokio::test]
async fn background_reaper_sweeps_until_shutdown() {
    let store = TestStore::new();
    let tracker = Arc::new(store.open().await);
    tracker.register("B", "x", PriorityTier::Normal).await.unwrap();
    let item = tracker.claim("w1", None).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let reaper = Reaper::new(Arc::clone(&tracker), Duration::from_millis(20))
        .unwrap()
        .timeout(Duration::ZERO);
    let handle = reaper.spawn();

    let mut reset = false;
    for _ in 0..100 {
        if tracker.get(&item.id).await.unwrap().status == Status::Pending {
            reset = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(reset, "reaper never reset the stale claim");

    reaper.shutdown();
    let total = handle.await.unwrap().unwrap();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn reaper_rejects_zero_interval() {
    let tracker = Arc::new(memory_tracker().await);
    let result = Reaper::new(tracker, Duration::ZERO);
    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test]
async fn huge_timeout_reaps_nothing() {
    let tracker = memory_tracker().await;
    tracker.register("B", "x", PriorityTier::Normal).await.unwrap();
    tracker.claim("w1", None).await.unwrap().unwrap();

    // Reaches past the earliest representable timestamp.
    let reset = tracker
        .reap_stale(Duration::from_secs(10u64.pow(13)))
        .await
        .unwrap();
    assert_eq!(reset, 0);

    let item = tracker.get(&ItemId::from("B")).await.unwrap();
    assert_eq!(item.status, Status::InProgress);
    assert_eq!(item.owner.as_deref(), Some("w1"));
}
