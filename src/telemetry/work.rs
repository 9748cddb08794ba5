//! Span helpers for tracker operations.
//!
//! Every public tracker call runs inside one of these spans so a worker's
//! claim, completion, and any lost races line up in a single trace.

use tracing::Span;

/// Span for a claim attempt. `item.id` is filled once a claim lands.
pub fn claim_span(worker: &str, category: Option<&str>) -> Span {
    tracing::info_span!(
        "tracker.claim",
        "worker.id" = worker,
        "item.category" = category.unwrap_or("*"),
        "item.id" = tracing::field::Empty,
    )
}

/// Span for an operation on one claimed item (complete, fail).
pub fn item_span(operation: &'static str, worker: &str, item: &str) -> Span {
    tracing::info_span!(
        "tracker.item",
        "tracker.operation" = operation,
        "worker.id" = worker,
        "item.id" = item,
        "item.status" = tracing::field::Empty,
    )
}

/// Span for store-wide maintenance and reads (register, reap, stats).
pub fn store_span(operation: &'static str) -> Span {
    tracing::info_span!("tracker.store", "tracker.operation" = operation)
}

/// Record a status transition on the given span.
pub fn record_transition(span: &Span, item: &str, from: &str, to: &str) {
    span.record("item.status", to);
    span.in_scope(|| {
        tracing::info!(item, from, to, "state_transition");
    });
}
