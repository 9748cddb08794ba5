//! Claim: pick the best pending candidate and take it with a
//! compare-and-swap. A lost race falls through to the next candidate.

use chrono::Utc;
use opentelemetry::KeyValue;
use std::time::Instant;
use tracing::{Instrument, Span, debug, warn};

use super::{Tracker, transition};
use crate::db::workers::Activity;
use crate::error::Result;
use crate::model::*;
use crate::telemetry::metrics;
use crate::telemetry::work::{claim_span, record_transition};

impl Tracker {
    /// Claim the next eligible item for `worker`, optionally limited to one
    /// category. Returns `None` if nothing is claimable or every attempt
    /// lost its race.
    pub async fn claim(&self, worker: &str, category: Option<&str>) -> Result<Option<WorkItem>> {
        let span = claim_span(worker, category);
        let started = Instant::now();
        let result = self
            .claim_inner(worker, category, &span)
            .instrument(span.clone())
            .await;
        self.observe("claim", started, result)
    }

    async fn claim_inner(
        &self,
        worker: &str,
        category: Option<&str>,
        span: &Span,
    ) -> Result<Option<WorkItem>> {
        let max_retries = self.settings.max_retries;

        for attempt in 1..=self.settings.claim_attempts {
            let Some(candidate) = self.db.next_candidate(category, max_retries).await? else {
                metrics::claims().add(1, &[KeyValue::new("result", "none_available")]);
                debug!("no claimable work");
                return Ok(None);
            };

            let now = Utc::now();
            let Some(item) = self.db.try_claim(&candidate, worker, max_retries, now).await? else {
                metrics::claims().add(1, &[KeyValue::new("result", "contention")]);
                debug!(item = %candidate, attempt, "lost claim race");
                continue;
            };

            let touched = self
                .db
                .touch_worker(worker, Activity::Claimed(&item.id), now)
                .await;
            self.after_commit("claim.worker", &item.id, touched);

            span.record("item.id", item.id.as_str());
            record_transition(span, item.id.as_str(), "pending", "in_progress");
            transition(Status::Pending, Status::InProgress);
            metrics::claims().add(1, &[KeyValue::new("result", "claimed")]);
            return Ok(Some(item));
        }

        warn!(
            attempts = self.settings.claim_attempts,
            "giving up claim after repeated contention"
        );
        Ok(None)
    }
}
