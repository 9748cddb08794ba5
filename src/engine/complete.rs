//! Completion and failure reporting for claimed items.

use chrono::Utc;
use std::time::Instant;
use tracing::{Instrument, Span, info, warn};

use super::{Tracker, transition};
use crate::db::workers::Activity;
use crate::error::{Error, Result};
use crate::model::*;
use crate::telemetry::work::{item_span, record_transition};

impl Tracker {
    /// Report the outcome of a claimed item.
    ///
    /// Only the worker currently holding the item may report it. A report
    /// for an item that was reaped or already finished changes nothing and
    /// returns [`Error::NotOwner`].
    pub async fn complete(
        &self,
        worker: &str,
        item: &ItemId,
        outcome: Outcome,
    ) -> Result<Completion> {
        let operation = if outcome.is_success() { "complete" } else { "fail" };
        let span = item_span(operation, worker, item.as_str());
        let started = Instant::now();
        let result = self
            .complete_inner(worker, item, outcome, &span)
            .instrument(span.clone())
            .await;
        self.observe(operation, started, result)
    }

    /// Report a failed attempt. Equivalent to `complete` with a failure outcome.
    pub async fn fail(
        &self,
        worker: &str,
        item: &ItemId,
        error: impl Into<String>,
    ) -> Result<Completion> {
        self.complete(worker, item, Outcome::failure(error)).await
    }

    async fn complete_inner(
        &self,
        worker: &str,
        item: &ItemId,
        outcome: Outcome,
        span: &Span,
    ) -> Result<Completion> {
        let now = Utc::now();

        let completion = match outcome.error {
            None => {
                if !self
                    .db
                    .mark_completed(item, worker, outcome.reclassify, now)
                    .await?
                {
                    return Err(self.ownership_error(item, worker).await);
                }
                Completion::Completed
            }
            Some(ref error) => {
                let Some((status, retry_count)) = self
                    .db
                    .mark_failed(item, worker, error, self.settings.max_retries, now)
                    .await?
                else {
                    return Err(self.ownership_error(item, worker).await);
                };
                if status == Status::Failed {
                    warn!(item = %item, retry_count, error = %error, "retries exhausted, item failed permanently");
                    Completion::PermanentlyFailed { retry_count }
                } else {
                    info!(item = %item, retry_count, error = %error, "attempt failed, item returned to pending");
                    Completion::Retrying { retry_count }
                }
            }
        };

        let to = match completion {
            Completion::Completed => Status::Completed,
            Completion::Retrying { .. } => Status::Pending,
            Completion::PermanentlyFailed { .. } => Status::Failed,
        };
        record_transition(span, item.as_str(), "in_progress", to.as_str());
        transition(Status::InProgress, to);

        if !outcome.audit.is_empty() {
            let appended = self.db.append_audit(item, worker, &outcome.audit, now).await;
            self.after_commit("complete.audit", item, appended);
        }

        let activity = match completion {
            Completion::Completed => Activity::Processed,
            _ => Activity::Failed,
        };
        let touched = self.db.touch_worker(worker, activity, now).await;
        self.after_commit("complete.worker", item, touched);

        Ok(completion)
    }

    /// Tell a missing item apart from one held by someone else.
    async fn ownership_error(&self, item: &ItemId, worker: &str) -> Error {
        match self.db.find_item(item).await {
            Ok(Some(current)) => {
                warn!(
                    item = %item,
                    worker,
                    status = %current.status,
                    owner = current.owner.as_deref().unwrap_or("-"),
                    "discarding report for item not owned by worker"
                );
                Error::NotOwner {
                    item: item.clone(),
                    worker: worker.to_string(),
                }
            }
            Ok(None) => Error::NotFound(item.clone()),
            Err(e) => e,
        }
    }
}
