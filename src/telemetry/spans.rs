//! Request span helpers.
//!
//! Every engine entry point runs inside a span carrying the domain and the
//! ids involved; state changes are recorded as events on that span.

use tracing::Span;

/// Start a span for one engine operation.
///
/// `work.id` is declared empty and filled in once an item is chosen.
pub fn start_request_span(operation: &'static str, domain: &str, worker_id: &str) -> Span {
    tracing::info_span!(
        "surveyq.request",
        "surveyq.operation" = operation,
        "work.domain" = domain,
        "worker.id" = worker_id,
        "work.id" = tracing::field::Empty,
    )
}

/// Record the chosen work item on a request span.
pub fn record_work_id(span: &Span, work_id: &impl std::fmt::Display) {
    span.record("work.id", tracing::field::display(work_id));
}

/// Record a state transition event on the given span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
