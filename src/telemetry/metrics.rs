//! Metric instrument factories for the tracker.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"enhancement-tracker"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for tracker instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("enhancement-tracker")
}

/// Counter: register calls.
/// Labels: `category`, `result` ("inserted" | "already_exists").
pub fn items_registered() -> Counter<u64> {
    meter()
        .u64_counter("tracker.items.registered")
        .with_description("Number of register calls by result")
        .build()
}

/// Counter: claim calls and lost compare-and-swap races.
/// Labels: `result` ("claimed" | "contention" | "none_available").
pub fn claims() -> Counter<u64> {
    meter()
        .u64_counter("tracker.claims")
        .with_description("Claim outcomes, including lost races")
        .build()
}

/// Counter: work item status transitions.
/// Labels: `from`, `to`.
pub fn transitions() -> Counter<u64> {
    meter()
        .u64_counter("tracker.transitions")
        .with_description("Number of work item status transitions")
        .build()
}

/// Counter: stale claims returned to pending by the reaper.
pub fn reaped() -> Counter<u64> {
    meter()
        .u64_counter("tracker.reaped")
        .with_description("Stale claims reset to pending")
        .build()
}

/// Counter: operations that failed because the store was busy or unreachable.
/// Labels: `operation`.
pub fn store_unavailable() -> Counter<u64> {
    meter()
        .u64_counter("tracker.store_unavailable")
        .with_description("Operations failed with the store unavailable")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("tracker.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
