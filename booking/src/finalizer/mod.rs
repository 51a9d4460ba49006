//! Booking finalizer: the queue consumer that materializes bookings.
//!
//! Per delivery:
//! - decode; an undecodable payload is dead-lettered at once
//! - idempotent upsert keyed by `reservation_id`
//! - notify (best-effort) when the upsert changed the row
//! - ack
//!
//! A storage failure rejects the message; the queue redelivers it with
//! backoff and dead-letters it once the retry budget is spent.
//!
//! Several finalizers may consume the same queue. Nothing here relies on
//! ordering between them: replays and reorderings converge through the
//! guarded upsert.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{Instrument, debug, error, field, info, info_span, warn};
use uuid::Uuid;

use crate::bookings::model::{BookingStatus, UpsertOutcome};
use crate::bookings::repository::BookingStore;
use crate::error::QueueError;
use crate::metrics::counters::Counters;
use crate::notify::NotificationDispatcher;
use crate::queue::instruction::FulfillmentInstruction;
use crate::queue::{Delivery, FulfillmentQueue, RejectOutcome};
use crate::time::now_ms;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Row written; notification attempted.
    Applied { booking_id: Uuid, status: BookingStatus },
    /// Stale or post-cancel replay; the stored row wins.
    Superseded { booking_id: Uuid, stored: BookingStatus },
    Requeued { retry_at_ms: u64 },
    DeadLettered,
}

pub struct BookingFinalizer {
    store: Arc<dyn BookingStore>,
    queue: Arc<dyn FulfillmentQueue>,
    notifier: Arc<dyn NotificationDispatcher>,
    counters: Counters,
    worker_id: usize,
    poll_interval: Duration,
}

impl BookingFinalizer {
    pub fn new(
        store: Arc<dyn BookingStore>,
        queue: Arc<dyn FulfillmentQueue>,
        notifier: Arc<dyn NotificationDispatcher>,
        counters: Counters,
        worker_id: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            notifier,
            counters,
            worker_id,
            poll_interval,
        }
    }

    /// Handles one leased delivery, acking, rejecting or parking it.
    pub async fn handle(&self, delivery: &Delivery) -> Result<FinalizeOutcome, QueueError> {
        let span = info_span!(
            "finalize",
            worker_id = self.worker_id,
            message_id = %delivery.message_id,
            attempts = delivery.attempts,
            booking_id = field::Empty,
            event_id = field::Empty
        );

        self.handle_inner(delivery).instrument(span).await
    }

    async fn handle_inner(&self, delivery: &Delivery) -> Result<FinalizeOutcome, QueueError> {
        if delivery.attempts > 1 {
            Counters::bump(&self.counters.redelivered);
        }

        let instruction: FulfillmentInstruction = match serde_json::from_str(&delivery.payload) {
            Ok(i) => i,
            Err(e) => {
                warn!(error = %e, "undecodable payload; dead-lettering");
                self.queue
                    .dead_letter(delivery, &format!("malformed payload: {e}"))
                    .await?;
                Counters::bump(&self.counters.dead_lettered);
                return Ok(FinalizeOutcome::DeadLettered);
            }
        };

        common::logger::annotate_booking(
            &instruction.event_id,
            Some(&instruction.booking_id.to_string()),
        );

        let upsert = match self.store.upsert(&instruction, now_ms()).await {
            Ok(u) => u,
            Err(e) => {
                warn!(error = %e, "booking upsert failed");
                return match self.queue.reject(delivery, &e.to_string()).await? {
                    RejectOutcome::Requeued { retry_at_ms } => {
                        Ok(FinalizeOutcome::Requeued { retry_at_ms })
                    }
                    RejectOutcome::DeadLettered => {
                        Counters::bump(&self.counters.dead_lettered);
                        Ok(FinalizeOutcome::DeadLettered)
                    }
                };
            }
        };

        let outcome = match upsert {
            UpsertOutcome::Applied => {
                let status = BookingStatus::from(instruction.status);
                self.notify(&instruction, status).await;
                FinalizeOutcome::Applied {
                    booking_id: instruction.booking_id,
                    status,
                }
            }
            UpsertOutcome::Superseded(stored) => {
                debug!(%stored, incoming = ?instruction.status, "replay superseded by stored row");
                FinalizeOutcome::Superseded {
                    booking_id: instruction.booking_id,
                    stored,
                }
            }
        };

        self.queue.ack(delivery).await?;
        Counters::bump(&self.counters.finalized);
        info!(?outcome, "message finalized");

        Ok(outcome)
    }

    async fn notify(&self, instruction: &FulfillmentInstruction, status: BookingStatus) {
        if let Err(e) = self
            .notifier
            .send(
                &instruction.user_email,
                &instruction.event_name,
                &instruction.booking_id,
                status,
            )
            .await
        {
            Counters::bump(&self.counters.notify_failed);
            warn!(error = %e, "notification failed; continuing");
        }
    }

    /// Leases and handles one message. `None` when the queue is empty.
    pub async fn process_one(&self) -> Result<Option<FinalizeOutcome>, QueueError> {
        match self.queue.receive().await? {
            Some(delivery) => self.handle(&delivery).await.map(Some),
            None => Ok(None),
        }
    }

    /// Processes until nothing is deliverable; returns the number handled.
    pub async fn drain(&self) -> Result<usize, QueueError> {
        let mut handled = 0;
        while self.process_one().await?.is_some() {
            handled += 1;
        }
        Ok(handled)
    }

    /// Worker loop. Never exits on a failed message; stops when `shutdown`
    /// flips to true, after the message in hand is finished.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            component = "finalizer",
            worker_id = self.worker_id,
            event = "startup"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.process_one().await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    error!(worker_id = self.worker_id, error = %e, "finalizer step failed");
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

        warn!(
            component = "finalizer",
            worker_id = self.worker_id,
            "finalizer exiting"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tracing_test::traced_test;

    use crate::bookings::model::Booking;
    use crate::error::{BookingError, BookingResult, NotifyError};
    use crate::queue::instruction::FulfillmentStatus;

    #[derive(Default)]
    struct MemQueue {
        ready: Mutex<VecDeque<Delivery>>,
        acked: Mutex<Vec<String>>,
        dead: Mutex<Vec<String>>,
        rejected: Mutex<Vec<String>>,
    }

    impl MemQueue {
        fn push(&self, payload: String) {
            let mut ready = self.ready.lock();
            let seq = ready.len() as i64 + 1;
            ready.push_back(Delivery {
                seq,
                message_id: format!("m{seq}"),
                payload,
                attempts: 1,
                lease_until_ms: 0,
            });
        }
    }

    #[async_trait]
    impl FulfillmentQueue for MemQueue {
        async fn publish(&self, instruction: &FulfillmentInstruction) -> Result<(), QueueError> {
            self.push(serde_json::to_string(instruction)?);
            Ok(())
        }

        async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
            Ok(self.ready.lock().pop_front())
        }

        async fn ack(&self, d: &Delivery) -> Result<(), QueueError> {
            self.acked.lock().push(d.message_id.clone());
            Ok(())
        }

        async fn reject(&self, d: &Delivery, _reason: &str) -> Result<RejectOutcome, QueueError> {
            self.rejected.lock().push(d.message_id.clone());
            Ok(RejectOutcome::Requeued { retry_at_ms: 0 })
        }

        async fn dead_letter(&self, d: &Delivery, _reason: &str) -> Result<(), QueueError> {
            self.dead.lock().push(d.message_id.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemStore {
        rows: Mutex<HashMap<Uuid, BookingStatus>>,
        fail: bool,
    }

    #[async_trait]
    impl BookingStore for MemStore {
        async fn upsert(
            &self,
            i: &FulfillmentInstruction,
            _now_ms: u64,
        ) -> BookingResult<UpsertOutcome> {
            if self.fail {
                return Err(BookingError::CorruptRow("store offline".into()));
            }
            let mut rows = self.rows.lock();
            let next = BookingStatus::from(i.status);
            match rows.get(&i.booking_id).copied() {
                Some(cur) if !cur.accepts(next) => Ok(UpsertOutcome::Superseded(cur)),
                _ => {
                    rows.insert(i.booking_id, next);
                    Ok(UpsertOutcome::Applied)
                }
            }
        }

        async fn fetch(&self, _id: &Uuid) -> BookingResult<Option<Booking>> {
            Ok(None)
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl NotificationDispatcher for FailingNotifier {
        async fn send(
            &self,
            _r: &str,
            _e: &str,
            _id: &Uuid,
            _s: BookingStatus,
        ) -> Result<(), NotifyError> {
            Err(NotifyError::Rejected("smtp down".into()))
        }
    }

    fn instruction(status: FulfillmentStatus) -> FulfillmentInstruction {
        FulfillmentInstruction {
            booking_id: Uuid::new_v4(),
            event_id: "evt-1".into(),
            user_id: "u1".into(),
            user_email: "u1@example.com".into(),
            event_name: "Gig".into(),
            status,
            requested_ms: None,
        }
    }

    fn finalizer(
        store: Arc<MemStore>,
        queue: Arc<MemQueue>,
        counters: Counters,
    ) -> BookingFinalizer {
        BookingFinalizer::new(
            store,
            queue,
            Arc::new(FailingNotifier),
            counters,
            0,
            Duration::from_millis(5),
        )
    }

    #[tokio::test]
    #[traced_test]
    async fn notification_failure_still_acks() {
        let store = Arc::new(MemStore::default());
        let queue = Arc::new(MemQueue::default());
        let counters = Counters::default();
        queue
            .publish(&instruction(FulfillmentStatus::Confirmed))
            .await
            .unwrap();

        let f = finalizer(store.clone(), queue.clone(), counters.clone());
        let out = f.process_one().await.unwrap().unwrap();

        assert!(matches!(out, FinalizeOutcome::Applied { .. }));
        assert_eq!(queue.acked.lock().len(), 1);
        assert_eq!(Counters::read(&counters.notify_failed), 1);
        assert_eq!(Counters::read(&counters.finalized), 1);
        assert!(logs_contain("notification failed; continuing"));
    }

    #[tokio::test]
    async fn malformed_payload_is_parked_not_retried() {
        let queue = Arc::new(MemQueue::default());
        queue.push("{\"reservation_id\":".into());

        let f = finalizer(
            Arc::new(MemStore::default()),
            queue.clone(),
            Counters::default(),
        );
        let out = f.process_one().await.unwrap().unwrap();

        assert_eq!(out, FinalizeOutcome::DeadLettered);
        assert_eq!(*queue.dead.lock(), vec!["m1".to_string()]);
        assert!(queue.rejected.lock().is_empty());
        assert!(queue.acked.lock().is_empty());
    }

    #[tokio::test]
    async fn storage_failure_rejects() {
        let queue = Arc::new(MemQueue::default());
        queue
            .publish(&instruction(FulfillmentStatus::Waiting))
            .await
            .unwrap();
        let store = Arc::new(MemStore {
            fail: true,
            ..MemStore::default()
        });

        let f = finalizer(store, queue.clone(), Counters::default());
        let out = f.process_one().await.unwrap().unwrap();

        assert!(matches!(out, FinalizeOutcome::Requeued { .. }));
        assert_eq!(queue.rejected.lock().len(), 1);
        assert!(queue.acked.lock().is_empty());
    }

    #[tokio::test]
    async fn stale_waiting_replay_is_superseded() {
        let store = Arc::new(MemStore::default());
        let queue = Arc::new(MemQueue::default());
        let confirmed = instruction(FulfillmentStatus::Confirmed);
        queue.publish(&confirmed).await.unwrap();
        queue
            .publish(&confirmed.clone().with_status(FulfillmentStatus::Waiting))
            .await
            .unwrap();

        let f = finalizer(store.clone(), queue.clone(), Counters::default());
        assert_eq!(f.drain().await.unwrap(), 2);

        assert_eq!(
            store.rows.lock().get(&confirmed.booking_id).copied(),
            Some(BookingStatus::Confirmed)
        );
        assert_eq!(queue.acked.lock().len(), 2);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let f = finalizer(
            Arc::new(MemStore::default()),
            Arc::new(MemQueue::default()),
            Counters::default(),
        );

        let handle = tokio::spawn(f.run(rx));
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
