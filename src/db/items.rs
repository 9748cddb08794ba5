//! Work item primitives: idempotent insert, candidate selection, and the
//! compare-and-swap status updates the claim and completion paths rely on.
//!
//! Every mutation here is a single statement scoped to one row (the stale
//! reset is the one bounded multi-row update). None of them hold a
//! transaction open across caller code.

use chrono::{DateTime, Utc};

use super::{parse_opt_ts, parse_ts, ts};
use crate::error::{Error, Result};
use crate::model::*;

const ITEM_COLUMNS: &str = "id, category, priority_tier, status, owner, claimed_at, completed_at, \
     completed_by, retry_count, last_error, created_at, updated_at";

/// Validate a state transition, returning an error if disallowed.
fn validate_transition(from: Status, to: Status) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition { from, to })
    }
}

impl super::Db {
    /// Insert a pending item unless the id is already tracked.
    ///
    /// Returns `false` when the id existed; the existing row is untouched.
    pub async fn insert_item(
        &self,
        id: &ItemId,
        category: &str,
        tier: PriorityTier,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let now = ts(now);
        let rows_affected = sqlx::query(
            "INSERT INTO work_items (id, category, priority_tier, status, retry_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?4)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(id.as_str())
        .bind(category)
        .bind(tier.rank())
        .bind(&now)
        .execute(self.pool())
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    /// Get a work item by ID.
    pub async fn get_item(&self, id: &ItemId) -> Result<WorkItem> {
        self.find_item(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.clone()))
    }

    pub async fn find_item(&self, id: &ItemId) -> Result<Option<WorkItem>> {
        let row: Option<WorkItemRow> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM work_items WHERE id = ?1"
        ))
        .bind(id.as_str())
        .fetch_optional(self.pool())
        .await?;

        row.map(WorkItemRow::try_into_work_item).transpose()
    }

    /// Best claimable item: pending, under the retry limit, optionally in
    /// one category, most urgent tier first, then registration order.
    pub async fn next_candidate(
        &self,
        category: Option<&str>,
        max_retries: u32,
    ) -> Result<Option<ItemId>> {
        let id: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM work_items
             WHERE status = 'pending'
               AND retry_count < ?1
               AND (?2 IS NULL OR category = ?2)
             ORDER BY priority_tier ASC, seq ASC
             LIMIT 1",
        )
        .bind(i64::from(max_retries))
        .bind(category)
        .fetch_optional(self.pool())
        .await?;

        Ok(id.map(|(id,)| ItemId(id)))
    }

    /// Compare-and-swap `Pending -> InProgress` for `worker`.
    ///
    /// Returns the claimed row, or `None` if it was no longer pending when
    /// the update ran, meaning another worker won the race.
    pub async fn try_claim(
        &self,
        id: &ItemId,
        worker: &str,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkItem>> {
        validate_transition(Status::Pending, Status::InProgress)?;

        let now = ts(now);
        let row: Option<WorkItemRow> = sqlx::query_as(&format!(
            "UPDATE work_items
             SET status = 'in_progress', owner = ?1, claimed_at = ?2, updated_at = ?2
             WHERE id = ?3 AND status = 'pending' AND retry_count < ?4
             RETURNING {ITEM_COLUMNS}"
        ))
        .bind(worker)
        .bind(&now)
        .bind(id.as_str())
        .bind(i64::from(max_retries))
        .fetch_optional(self.pool())
        .await?;

        row.map(WorkItemRow::try_into_work_item).transpose()
    }

    /// Compare-and-swap `InProgress(worker) -> Completed`.
    ///
    /// Returns `false` if `worker` does not hold the item.
    pub async fn mark_completed(
        &self,
        id: &ItemId,
        worker: &str,
        reclassify: Option<PriorityTier>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        validate_transition(Status::InProgress, Status::Completed)?;

        let now = ts(now);
        let rows_affected = sqlx::query(
            "UPDATE work_items
             SET status = 'completed', owner = NULL, claimed_at = NULL,
                 completed_at = ?1, completed_by = ?2, updated_at = ?1,
                 priority_tier = COALESCE(?3, priority_tier)
             WHERE id = ?4 AND status = 'in_progress' AND owner = ?2",
        )
        .bind(&now)
        .bind(worker)
        .bind(reclassify.map(PriorityTier::rank))
        .bind(id.as_str())
        .execute(self.pool())
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    /// Compare-and-swap `InProgress(worker) -> Pending | Failed`, recording
    /// the error and bumping `retry_count` in the same statement.
    ///
    /// Returns the resulting status and retry count, or `None` if `worker`
    /// does not hold the item.
    pub async fn mark_failed(
        &self,
        id: &ItemId,
        worker: &str,
        error: &str,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<(Status, u32)>> {
        validate_transition(Status::InProgress, Status::Pending)?;
        validate_transition(Status::InProgress, Status::Failed)?;

        // SET expressions see the pre-update row, so `retry_count + 1` is
        // the new count everywhere below.
        let now = ts(now);
        let row: Option<(String, i64)> = sqlx::query_as(
            "UPDATE work_items
             SET retry_count = retry_count + 1,
                 last_error = ?1,
                 status = CASE WHEN retry_count + 1 >= ?2 THEN 'failed' ELSE 'pending' END,
                 completed_at = CASE WHEN retry_count + 1 >= ?2 THEN ?3 ELSE completed_at END,
                 owner = NULL, claimed_at = NULL, updated_at = ?3
             WHERE id = ?4 AND status = 'in_progress' AND owner = ?5
             RETURNING status, retry_count",
        )
        .bind(error)
        .bind(i64::from(max_retries))
        .bind(&now)
        .bind(id.as_str())
        .bind(worker)
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some((status, retry_count)) => {
                let status: Status = status.parse()?;
                Ok(Some((status, count(retry_count)?)))
            }
            None => Ok(None),
        }
    }

    /// Return every item claimed before `cutoff` to the pending pool.
    ///
    /// `retry_count` is left alone: an abandoned claim is not a failure.
    pub async fn reset_claimed_before(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ItemId>> {
        validate_transition(Status::InProgress, Status::Pending)?;

        let ids: Vec<(String,)> = sqlx::query_as(
            "UPDATE work_items
             SET status = 'pending', owner = NULL, claimed_at = NULL, updated_at = ?1
             WHERE status = 'in_progress' AND claimed_at < ?2
             RETURNING id",
        )
        .bind(ts(now))
        .bind(ts(cutoff))
        .fetch_all(self.pool())
        .await?;

        Ok(ids.into_iter().map(|(id,)| ItemId(id)).collect())
    }

    /// List work items in claim order.
    pub async fn list_items(
        &self,
        status: Option<Status>,
        category: Option<&str>,
        limit: u32,
    ) -> Result<Vec<WorkItem>> {
        let rows: Vec<WorkItemRow> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM work_items
             WHERE (?1 IS NULL OR status = ?1)
               AND (?2 IS NULL OR category = ?2)
             ORDER BY priority_tier ASC, seq ASC
             LIMIT ?3"
        ))
        .bind(status.map(Status::as_str))
        .bind(category)
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(WorkItemRow::try_into_work_item)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Audit
    // -----------------------------------------------------------------------

    /// Append audit entries for an item. Never read by claim/complete logic.
    pub async fn append_audit(
        &self,
        item: &ItemId,
        worker: &str,
        entries: &[AuditEntry],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let now = ts(now);
        for entry in entries {
            sqlx::query(
                "INSERT INTO update_records (item_id, worker_id, source, description, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(item.as_str())
            .bind(worker)
            .bind(&entry.source)
            .bind(&entry.description)
            .bind(&now)
            .execute(self.pool())
            .await?;
        }
        Ok(())
    }

    /// Audit entries for an item, oldest first.
    pub async fn audit_log(&self, item: &ItemId) -> Result<Vec<UpdateRecord>> {
        let rows: Vec<(i64, String, String, String, String, String)> = sqlx::query_as(
            "SELECT id, item_id, worker_id, source, description, created_at
             FROM update_records WHERE item_id = ?1 ORDER BY id ASC",
        )
        .bind(item.as_str())
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|(id, item_id, worker_id, source, description, created_at)| -> Result<UpdateRecord> {
                Ok(UpdateRecord {
                    id,
                    item_id: ItemId(item_id),
                    worker_id,
                    source,
                    description,
                    created_at: parse_ts(&created_at)?,
                })
            })
            .collect()
    }
}

pub(crate) fn count(raw: i64) -> Result<u32> {
    u32::try_from(raw).map_err(|_| Error::Other(format!("count out of range: {raw}")))
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
pub(crate) struct WorkItemRow {
    id: String,
    category: String,
    priority_tier: i64,
    status: String,
    owner: Option<String>,
    claimed_at: Option<String>,
    completed_at: Option<String>,
    completed_by: Option<String>,
    retry_count: i64,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl WorkItemRow {
    pub(crate) fn try_into_work_item(self) -> Result<WorkItem> {
        Ok(WorkItem {
            id: ItemId(self.id),
            category: self.category,
            priority_tier: PriorityTier::from_rank(self.priority_tier)?,
            status: self.status.parse()?,
            owner: self.owner,
            claimed_at: parse_opt_ts(self.claimed_at)?,
            completed_at: parse_opt_ts(self.completed_at)?,
            completed_by: self.completed_by,
            retry_count: count(self.retry_count)?,
            last_error: self.last_error,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}
