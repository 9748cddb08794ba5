//! Read-only aggregate queries for operator visibility.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::parse_ts;
use super::workers::{WorkerRow, counter};
use crate::error::Result;
use crate::model::*;

/// Point-in-time view of the queue.
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    /// Every status appears, zero-filled.
    pub counts_by_status: BTreeMap<Status, u64>,
    pub counts_by_category: BTreeMap<String, BTreeMap<Status, u64>>,
    /// Claimable pending items per tier.
    pub pending_by_priority: BTreeMap<PriorityTier, u64>,
    pub active_workers: Vec<Worker>,
    pub recent_completions: Vec<RecentCompletion>,
    pub totals: Totals,
    /// Items nobody could finish.
    pub permanent_failures: u64,
    /// Store outages observed by the `Tracker` handle that built this
    /// snapshot, since it was opened. Not a store-wide count: a fresh
    /// process (such as a one-shot CLI call) reports 0.
    pub store_unavailable_errors: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentCompletion {
    pub id: ItemId,
    pub category: String,
    pub completed_by: Option<String>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub processed: u64,
    pub failed: u64,
}

fn zeroed() -> BTreeMap<Status, u64> {
    Status::ALL.into_iter().map(|s| (s, 0)).collect()
}

impl super::Db {
    /// Gather a consistent snapshot inside one read transaction.
    pub async fn stats(&self, max_retries: u32, recent: u32) -> Result<Stats> {
        let mut tx = self.pool().begin().await?;

        let by_category: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT category, status, COUNT(*) FROM work_items GROUP BY category, status",
        )
        .fetch_all(&mut *tx)
        .await?;

        let mut counts_by_status = zeroed();
        let mut counts_by_category: BTreeMap<String, BTreeMap<Status, u64>> = BTreeMap::new();
        for (category, status, n) in by_category {
            let status: Status = status.parse()?;
            let n = counter(n)?;
            *counts_by_status.entry(status).or_default() += n;
            *counts_by_category
                .entry(category)
                .or_insert_with(zeroed)
                .entry(status)
                .or_default() += n;
        }

        let by_priority: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT priority_tier, COUNT(*) FROM work_items
             WHERE status = 'pending' AND retry_count < ?1
             GROUP BY priority_tier",
        )
        .bind(i64::from(max_retries))
        .fetch_all(&mut *tx)
        .await?;

        let mut pending_by_priority: BTreeMap<PriorityTier, u64> =
            PriorityTier::ALL.into_iter().map(|t| (t, 0)).collect();
        for (rank, n) in by_priority {
            pending_by_priority.insert(PriorityTier::from_rank(rank)?, counter(n)?);
        }

        let workers: Vec<WorkerRow> = sqlx::query_as(
            "SELECT id, status, current_item, processed_count, failed_count, started_at, last_activity_at
             FROM workers WHERE status = 'working' ORDER BY last_activity_at DESC",
        )
        .fetch_all(&mut *tx)
        .await?;
        let active_workers = workers
            .into_iter()
            .map(WorkerRow::try_into_worker)
            .collect::<Result<Vec<_>>>()?;

        let completions: Vec<(String, String, Option<String>, String)> = sqlx::query_as(
            "SELECT id, category, completed_by, completed_at FROM work_items
             WHERE status = 'completed'
             ORDER BY completed_at DESC, seq DESC
             LIMIT ?1",
        )
        .bind(i64::from(recent))
        .fetch_all(&mut *tx)
        .await?;
        let recent_completions = completions
            .into_iter()
            .map(|(id, category, completed_by, completed_at)| -> Result<RecentCompletion> {
                Ok(RecentCompletion {
                    id: ItemId(id),
                    category,
                    completed_by,
                    completed_at: parse_ts(&completed_at)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let (processed, failed): (i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(processed_count), 0), COALESCE(SUM(failed_count), 0) FROM workers",
        )
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let permanent_failures = counts_by_status
            .get(&Status::Failed)
            .copied()
            .unwrap_or_default();

        Ok(Stats {
            counts_by_status,
            counts_by_category,
            pending_by_priority,
            active_workers,
            recent_completions,
            totals: Totals {
                processed: counter(processed)?,
                failed: counter(failed)?,
            },
            permanent_failures,
            store_unavailable_errors: 0,
        })
    }
}
