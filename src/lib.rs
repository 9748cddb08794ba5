//! # enhancement-tracker
//!
//! Persistent multi-writer work queue for independent worker processes.
//!
//! Workers claim items with a compare-and-swap on the item's status, run
//! their work outside any store transaction, and report completion or
//! failure. Failed items retry up to a bound; abandoned claims are
//! recovered by the stale-claim reaper. Backed by SQLite (WAL) via sqlx,
//! with tracing and OpenTelemetry observability.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod telemetry;

pub use engine::{Reaper, Stats, Tracker};
pub use error::{Error, Result};
