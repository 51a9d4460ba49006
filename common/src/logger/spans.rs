use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{Span, field};

use super::TraceId;

/// Root span for one client operation (reserve / cancel / promote) or one worker job.
pub fn root_span(name: &'static str, trace_id: &TraceId) -> Span {
    tracing::info_span!(
        "root",
        name = %name,
        trace_id = %trace_id.as_str(),
        event_id = field::Empty,
        booking_id = field::Empty
    )
}

pub fn child_span(name: &'static str) -> Span {
    tracing::info_span!(
        "child",
        name = %name,
        event_id = field::Empty,
        booking_id = field::Empty
    )
}

/// Records the booking coordinates on the current span, if it declared them.
pub fn annotate_booking(event_id: &str, booking_id: Option<&str>) {
    let span = Span::current();
    span.record("event_id", field::display(event_id));
    if let Some(bid) = booking_id {
        span.record("booking_id", field::display(bid));
    }
}

pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: Future<Output = T>,
{
    let start = Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label = label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}
