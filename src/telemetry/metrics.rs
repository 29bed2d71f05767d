//! Metric instrument factories for surveyq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"surveyq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("surveyq")
}

/// Counter: leases granted by `request_work` or `force_assign`.
/// Labels: `domain`, `via` ("request" | "force").
pub fn leases_granted() -> Counter<u64> {
    meter()
        .u64_counter("surveyq.lease.granted")
        .with_description("Number of leases granted")
        .build()
}

/// Counter: candidate rows lost to another worker or found stale.
/// Labels: `domain`, `reason` ("cas_lost" | "ineligible" | "missing").
pub fn lease_contention() -> Counter<u64> {
    meter()
        .u64_counter("surveyq.lease.contention")
        .with_description("Candidates skipped during lease acquisition")
        .build()
}

/// Counter: `request_work` calls that returned no work.
/// Labels: `domain`.
pub fn no_work() -> Counter<u64> {
    meter()
        .u64_counter("surveyq.lease.no_work")
        .with_description("Work requests with nothing to offer")
        .build()
}

/// Counter: leases released voluntarily.
/// Labels: `domain`.
pub fn leases_released() -> Counter<u64> {
    meter()
        .u64_counter("surveyq.lease.released")
        .with_description("Number of leases released by their holder")
        .build()
}

/// Counter: expired leases reclaimed by the sweep.
/// Labels: `domain`.
pub fn leases_reclaimed() -> Counter<u64> {
    meter()
        .u64_counter("surveyq.lease.reclaimed")
        .with_description("Number of expired leases reclaimed")
        .build()
}

/// Counter: QC decisions recorded.
/// Labels: `outcome` ("Approved" | "Rejected").
pub fn review_decisions() -> Counter<u64> {
    meter()
        .u64_counter("surveyq.review.decisions")
        .with_description("Number of QC review decisions")
        .build()
}

/// Counter: call attempts recorded.
/// Labels: `outcome`, `disposition`.
pub fn call_attempts() -> Counter<u64> {
    meter()
        .u64_counter("surveyq.call.attempts")
        .with_description("Number of call attempts recorded")
        .build()
}

/// Counter: recording upload attempts.
/// Labels: `result` ("uploaded" | "failed" | "deleted" | "skipped").
pub fn recording_uploads() -> Counter<u64> {
    meter()
        .u64_counter("surveyq.recording.uploads")
        .with_description("Number of recording upload attempts")
        .build()
}

/// Counter: rows written by full view rebuilds.
/// Labels: `domain`.
pub fn view_rows_rebuilt() -> Counter<u64> {
    meter()
        .u64_counter("surveyq.view.rows_rebuilt")
        .with_description("Rows written by view rebuilds")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("surveyq.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
