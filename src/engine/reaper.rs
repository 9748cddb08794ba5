//! Stale-claim recovery.
//!
//! An item stuck in progress past the timeout is presumed abandoned and
//! returned to pending with its retry count untouched. The sweep is safe to
//! run at any time, from any process, any number of times.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{Instrument, debug, error, info};

use super::{Tracker, transition};
use crate::error::{Error, Result};
use crate::model::Status;
use crate::telemetry::metrics;
use crate::telemetry::work::store_span;

impl Tracker {
    /// Reset every item claimed more than `timeout` ago. Returns how many.
    pub async fn reap_stale(&self, timeout: Duration) -> Result<u64> {
        let started = Instant::now();
        let result = self
            .reap_inner(timeout)
            .instrument(store_span("reap_stale"))
            .await;
        self.observe("reap_stale", started, result)
    }

    /// Reap with the configured stale timeout.
    pub async fn reap_stale_default(&self) -> Result<u64> {
        self.reap_stale(self.settings.stale_timeout()).await
    }

    async fn reap_inner(&self, timeout: Duration) -> Result<u64> {
        let now = Utc::now();
        let timeout = chrono::Duration::from_std(timeout)
            .map_err(|e| Error::Config(format!("stale timeout out of range: {e}")))?;
        // A window reaching past the representable past cannot contain a claim.
        let Some(cutoff) = now.checked_sub_signed(timeout) else {
            debug!(timeout_secs = timeout.num_seconds(), "stale window predates any claim");
            return Ok(0);
        };
        let reset = self.db.reset_claimed_before(cutoff, now).await?;

        for id in &reset {
            info!(item = %id, "reset stale claim to pending");
            transition(Status::InProgress, Status::Pending);
        }
        let count = reset.len() as u64;
        if count > 0 {
            metrics::reaped().add(count, &[]);
        }
        Ok(count)
    }
}

/// Background sweep that reaps stale claims on a fixed interval.
pub struct Reaper {
    tracker: Arc<Tracker>,
    interval: Duration,
    timeout: Duration,
    shutdown: Arc<Notify>,
}

impl Clone for Reaper {
    fn clone(&self) -> Self {
        Self {
            tracker: Arc::clone(&self.tracker),
            interval: self.interval,
            timeout: self.timeout,
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl Reaper {
    /// Sweep every `interval`, using the tracker's configured stale timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `interval` is zero.
    pub fn new(tracker: Arc<Tracker>, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::Config("reaper interval must be non-zero".to_string()));
        }
        let timeout = tracker.settings().stale_timeout();
        Ok(Self {
            tracker,
            interval,
            timeout,
            shutdown: Arc::new(Notify::new()),
        })
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Signal the reaper to stop after its current sweep.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Sweep until shutdown. Returns the total number of items reset.
    ///
    /// Store errors are logged and the next tick tries again.
    pub async fn run(&self) -> Result<u64> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut total = 0;

        info!(
            interval_secs = self.interval.as_secs(),
            timeout_secs = self.timeout.as_secs(),
            "reaper started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!(total, "reaper shutting down");
                    return Ok(total);
                }
                _ = ticker.tick() => {}
            }

            match self.tracker.reap_stale(self.timeout).await {
                Ok(n) => total += n,
                Err(e) => error!("reaper sweep failed: {e}"),
            }
        }
    }

    /// Run on a tokio task. Call [`Reaper::shutdown`] on a clone to stop it.
    pub fn spawn(&self) -> tokio::task::JoinHandle<Result<u64>> {
        let reaper = self.clone();
        tokio::spawn(async move { reaper.run().await })
    }
}
