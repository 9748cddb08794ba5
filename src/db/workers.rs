//! Worker records: one upsert per claim/complete/fail, never inside an item
//! update, so the two tables are never locked together.

use chrono::{DateTime, Utc};

use super::{parse_ts, ts};
use crate::error::{Error, Result};
use crate::model::*;

/// How a worker record changes on an activity.
#[derive(Debug, Clone, Copy)]
pub enum Activity<'a> {
    Claimed(&'a ItemId),
    Processed,
    Failed,
}

impl super::Db {
    /// Record worker activity, creating the worker on first sight.
    pub async fn touch_worker(
        &self,
        worker: &str,
        activity: Activity<'_>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let (status, current_item, processed, failed) = match activity {
            Activity::Claimed(item) => (WorkerStatus::Working, Some(item.as_str()), 0i64, 0i64),
            Activity::Processed => (WorkerStatus::Idle, None, 1, 0),
            Activity::Failed => (WorkerStatus::Idle, None, 0, 1),
        };

        sqlx::query(
            "INSERT INTO workers (id, status, current_item, processed_count, failed_count, started_at, last_activity_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 current_item = excluded.current_item,
                 processed_count = processed_count + excluded.processed_count,
                 failed_count = failed_count + excluded.failed_count,
                 last_activity_at = excluded.last_activity_at",
        )
        .bind(worker)
        .bind(status.as_str())
        .bind(current_item)
        .bind(processed)
        .bind(failed)
        .bind(ts(now))
        .execute(self.pool())
        .await?;

        Ok(())
    }

    pub async fn get_worker(&self, id: &str) -> Result<Option<Worker>> {
        let row: Option<WorkerRow> = sqlx::query_as(
            "SELECT id, status, current_item, processed_count, failed_count, started_at, last_activity_at
             FROM workers WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        row.map(WorkerRow::try_into_worker).transpose()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
pub(crate) struct WorkerRow {
    id: String,
    status: String,
    current_item: Option<String>,
    processed_count: i64,
    failed_count: i64,
    started_at: String,
    last_activity_at: String,
}

impl WorkerRow {
    pub(crate) fn try_into_worker(self) -> Result<Worker> {
        Ok(Worker {
            id: self.id,
            status: self.status.parse()?,
            current_item: self.current_item.map(ItemId),
            processed_count: counter(self.processed_count)?,
            failed_count: counter(self.failed_count)?,
            started_at: parse_ts(&self.started_at)?,
            last_activity_at: parse_ts(&self.last_activity_at)?,
        })
    }
}

pub(crate) fn counter(raw: i64) -> Result<u64> {
    u64::try_from(raw).map_err(|_| Error::Other(format!("negative counter: {raw}")))
}
