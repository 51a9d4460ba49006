//! Outbox relay.
//!
//! Drains undispatched outbox rows in bounded batches:
//! - `fulfill` rows are published to the fulfillment queue, then marked
//!   dispatched. A crash in between republishes the instruction, which the
//!   idempotent finalizer absorbs.
//! - `promote` rows run the promotion in the same transaction that marks the
//!   row dispatched, so each released seat is promoted exactly once.
//!
//! Dispatched rows are kept for `retention` and then swept by the run loop.

use std::sync::Arc;
use std::time::Duration;

use common::logger::child_span;
use tokio::sync::watch;
use tokio::time::{Instant, sleep};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::{BookingError, BookingResult};
use crate::metrics::counters::Counters;
use crate::outbox::{OutboxEntry, OutboxMessage};
use crate::queue::FulfillmentQueue;
use crate::reservation::coordinator::record_promotion;
use crate::reservation::repository::ReservationRepository;
use crate::time::now_ms;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub published: usize,
    pub promotions: usize,
    /// Rows another relay dispatched first.
    pub skipped: usize,
}

impl RelayReport {
    pub fn total(&self) -> usize {
        self.published + self.promotions + self.skipped
    }
}

pub struct OutboxRelay {
    repo: Arc<dyn ReservationRepository>,
    queue: Arc<dyn FulfillmentQueue>,
    batch_size: usize,
    poll_interval: Duration,
    retention: Duration,
    sweep_interval: Duration,
    counters: Counters,
}

impl OutboxRelay {
    pub fn new(
        repo: Arc<dyn ReservationRepository>,
        queue: Arc<dyn FulfillmentQueue>,
        batch_size: usize,
        poll_interval: Duration,
        counters: Counters,
    ) -> Self {
        Self {
            repo,
            queue,
            batch_size: batch_size.max(1),
            poll_interval,
            retention: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60),
            counters,
        }
    }

    pub fn with_retention(mut self, retention: Duration, sweep_interval: Duration) -> Self {
        self.retention = retention;
        self.sweep_interval = sweep_interval;
        self
    }

    /// Deletes dispatched rows older than the retention window.
    pub async fn sweep(&self) -> BookingResult<u64> {
        let cutoff = now_ms().saturating_sub(self.retention.as_millis() as u64);
        let removed = self.repo.prune_dispatched(cutoff).await?;
        if removed > 0 {
            debug!(removed, cutoff, "dispatched outbox rows pruned");
        }
        Ok(removed)
    }

    /// One pass over at most `batch_size` pending rows.
    ///
    /// Stops at the first failure; the failed row and everything after it
    /// stay pending for the next pass.
    pub async fn run_once(&self) -> BookingResult<RelayReport> {
        let entries = self.repo.pending_outbox(self.batch_size, now_ms()).await?;
        let mut report = RelayReport::default();

        for entry in entries {
            self.relay_entry(entry, &mut report).await?;
        }

        Ok(report)
    }

    /// Runs passes until nothing is pending.
    pub async fn drain(&self) -> BookingResult<RelayReport> {
        let mut total = RelayReport::default();
        loop {
            let r = self.run_once().await?;
            if r.total() == 0 {
                return Ok(total);
            }
            total.published += r.published;
            total.promotions += r.promotions;
            total.skipped += r.skipped;
        }
    }

    async fn relay_entry(&self, entry: OutboxEntry, report: &mut RelayReport) -> BookingResult<()> {
        let seq = entry.seq;

        match entry.message {
            OutboxMessage::Fulfill(instruction) => {
                let span = info_span!(
                    "relay_fulfill",
                    seq,
                    booking_id = %instruction.booking_id,
                    event_id = %instruction.event_id
                );
                async {
                    self.queue.publish(&instruction).await?;
                    if self.repo.mark_dispatched(seq, now_ms()).await? {
                        Counters::bump(&self.counters.relayed);
                        report.published += 1;
                    } else {
                        // Published twice; the finalizer dedups on booking_id.
                        debug!("row dispatched concurrently");
                        report.skipped += 1;
                    }
                    Ok::<_, BookingError>(())
                }
                .instrument(span)
                .await
            }
            OutboxMessage::Promote { event_id } => {
                let span = info_span!(
                    "relay_promote",
                    seq,
                    event_id = %event_id,
                    booking_id = tracing::field::Empty
                );
                async {
                    match self
                        .repo
                        .promote_from_outbox(seq, &event_id, now_ms())
                        .await?
                    {
                        Some(outcome) => {
                            record_promotion(&self.counters, &event_id, outcome);
                            report.promotions += 1;
                        }
                        None => report.skipped += 1,
                    }
                    Ok::<_, BookingError>(())
                }
                .instrument(span)
                .await
            }
        }
    }

    /// Polls until `shutdown` flips to true. Errors are logged and retried on
    /// the next tick; the relay never exits on its own.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            component = "relay",
            event = "startup",
            batch_size = self.batch_size,
            "outbox relay started"
        );

        let mut next_sweep = Instant::now();

        loop {
            if *shutdown.borrow() {
                break;
            }

            if Instant::now() >= next_sweep {
                if let Err(e) = self.sweep().await {
                    warn!(component = "relay", error = %e, "outbox sweep failed");
                }
                next_sweep = Instant::now() + self.sweep_interval;
            }

            let idle = match self.run_once().instrument(child_span("outbox_pass")).await {
                // A full batch means more may be waiting.
                Ok(r) => r.total() < self.batch_size,
                Err(e) => {
                    error!(component = "relay", error = %e, "outbox pass failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = sleep(self.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        warn!(component = "relay", event = "shutdown", "outbox relay stopped");
    }
}
