//! Core engine. The public API workers, loaders, and operators call.
//!
//! A [`Tracker`] is one process's handle on the shared store. It holds no
//! locks between calls: claim and complete/fail each touch the store once,
//! and whatever work happens in between runs entirely outside the store.

mod claim;
mod complete;
pub mod reaper;
mod report;

pub use crate::db::stats::{RecentCompletion, Stats, Totals};
pub use reaper::Reaper;

use chrono::Utc;
use opentelemetry::KeyValue;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{Instrument, info, warn};

use crate::config::TrackerSettings;
use crate::db::{ConnectOptions, Db};
use crate::error::Result;
use crate::model::*;
use crate::telemetry::metrics;
use crate::telemetry::work::store_span;

/// The work tracker. Enforces the claim/complete/fail protocol on top of
/// the store's compare-and-swap primitives.
pub struct Tracker {
    db: Db,
    settings: TrackerSettings,
    /// StoreUnavailable errors seen through this handle.
    unavailable: Arc<AtomicU64>,
}

impl Tracker {
    /// Open the store at `url`, applying migrations.
    pub async fn open(url: &str, settings: TrackerSettings) -> Result<Self> {
        let db = Db::connect(
            url,
            &ConnectOptions {
                busy_timeout: settings.busy_timeout(),
                max_connections: settings.max_connections,
            },
        )
        .await?;
        db.migrate().await?;
        Ok(Self::with_db(db, settings))
    }

    /// Create a tracker with in-memory storage (for testing).
    pub async fn in_memory(settings: TrackerSettings) -> Result<Self> {
        let db = Db::in_memory().await?;
        db.migrate().await?;
        Ok(Self::with_db(db, settings))
    }

    pub fn with_db(db: Db, settings: TrackerSettings) -> Self {
        Self {
            db,
            settings,
            unavailable: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Release the store. Consumes the handle so it cannot be reused.
    pub async fn close(self) {
        self.db.close().await;
    }

    /// Register a work item. Re-registering a known id changes nothing.
    pub async fn register(
        &self,
        id: impl Into<ItemId>,
        category: &str,
        tier: PriorityTier,
    ) -> Result<Registration> {
        let id = id.into();
        let started = Instant::now();
        let result = self
            .register_inner(&id, category, tier)
            .instrument(store_span("register"))
            .await;
        self.observe("register", started, result)
    }

    async fn register_inner(
        &self,
        id: &ItemId,
        category: &str,
        tier: PriorityTier,
    ) -> Result<Registration> {
        let inserted = self.db.insert_item(id, category, tier, Utc::now()).await?;
        metrics::items_registered().add(
            1,
            &[
                KeyValue::new("category", category.to_string()),
                KeyValue::new("result", if inserted { "inserted" } else { "already_exists" }),
            ],
        );
        if inserted {
            info!(item = %id, category, %tier, "registered work item");
            Ok(Registration::Inserted)
        } else {
            Ok(Registration::AlreadyExists)
        }
    }

    /// Get a work item by ID.
    pub async fn get(&self, id: &ItemId) -> Result<WorkItem> {
        let started = Instant::now();
        let result = self.db.get_item(id).await;
        self.observe("get", started, result)
    }

    /// Get a worker record, if the worker has ever claimed anything.
    pub async fn worker(&self, id: &str) -> Result<Option<Worker>> {
        let started = Instant::now();
        let result = self.db.get_worker(id).await;
        self.observe("worker", started, result)
    }

    /// List work items in claim order.
    pub async fn list(
        &self,
        status: Option<Status>,
        category: Option<&str>,
        limit: u32,
    ) -> Result<Vec<WorkItem>> {
        let started = Instant::now();
        let result = self.db.list_items(status, category, limit).await;
        self.observe("list", started, result)
    }

    /// Audit entries recorded against an item.
    pub async fn audit_log(&self, id: &ItemId) -> Result<Vec<UpdateRecord>> {
        let started = Instant::now();
        let result = self.db.audit_log(id).await;
        self.observe("audit_log", started, result)
    }

    /// Claim one item, run `work` on it, and report the outcome.
    ///
    /// `work` runs after the claim has committed and before completion is
    /// written, so the store is never held while it runs. Returns `None`
    /// when nothing was claimable.
    pub async fn work_once<F, Fut>(
        &self,
        worker: &str,
        category: Option<&str>,
        work: F,
    ) -> Result<Option<(ItemId, Completion)>>
    where
        F: FnOnce(WorkItem) -> Fut,
        Fut: Future<Output = Outcome>,
    {
        let Some(item) = self.claim(worker, category).await? else {
            return Ok(None);
        };
        let id = item.id.clone();
        let outcome = work(item).await;
        let completion = self.complete(worker, &id, outcome).await?;
        Ok(Some((id, completion)))
    }

    /// Record duration, and count the failure if the store was unavailable.
    fn observe<T>(&self, operation: &'static str, started: Instant, result: Result<T>) -> Result<T> {
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", operation)],
        );
        if let Err(ref e) = result {
            if e.is_transient() {
                self.count_unavailable(operation);
                warn!(operation, error = %e, "store unavailable");
            }
        }
        result
    }

    /// Bookkeeping written after an item transition has committed. The
    /// transition stands either way, so a failure is logged, not returned.
    fn after_commit(&self, operation: &'static str, item: &ItemId, result: Result<()>) {
        if let Err(e) = result {
            if e.is_transient() {
                self.count_unavailable(operation);
            }
            warn!(operation, item = %item, error = %e, "bookkeeping write failed after commit");
        }
    }

    fn count_unavailable(&self, operation: &'static str) {
        self.unavailable.fetch_add(1, Ordering::Relaxed);
        metrics::store_unavailable().add(1, &[KeyValue::new("operation", operation)]);
    }

    pub(crate) fn unavailable_count(&self) -> u64 {
        self.unavailable.load(Ordering::Relaxed)
    }
}

fn transition(from: Status, to: Status) {
    metrics::transitions().add(
        1,
        &[
            KeyValue::new("from", from.as_str()),
            KeyValue::new("to", to.as_str()),
        ],
    );
}
