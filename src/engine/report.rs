//! Operator-facing snapshot of the queue.

use std::time::Instant;
use tracing::Instrument;

use super::{Stats, Tracker};
use crate::error::Result;
use crate::telemetry::work::store_span;

impl Tracker {
    /// Aggregate counts, active workers, and recent completions.
    ///
    /// Read-only; safe to call alongside any number of workers.
    pub async fn stats(&self) -> Result<Stats> {
        let started = Instant::now();
        let result = self
            .db
            .stats(self.settings.max_retries, self.settings.recent_completions)
            .instrument(store_span("stats"))
            .await
            .map(|mut stats| {
                stats.store_unavailable_errors = self.unavailable_count();
                stats
            });
        self.observe("stats", started, result)
    }
}
