use async_trait::async_trait;
use uuid::Uuid;

use crate::bookings::model::Booking;
use crate::error::BookingResult;
use crate::inventory::Admission;
use crate::outbox::OutboxEntry;
use crate::reservation::types::{CancelOutcome, PromoteOutcome, ReservationRequest};

/// Coordinator-side persistence. Every method is one transaction.
#[async_trait]
pub trait ReservationRepository: Send + Sync {
    /// Seat decrement plus outbox append of the matching instruction.
    async fn admit(
        &self,
        booking_id: Uuid,
        request: &ReservationRequest,
        now_ms: u64,
    ) -> BookingResult<Admission>;

    /// Status change plus, when a seat was released, a promotion request.
    async fn cancel(&self, booking_id: &Uuid, now_ms: u64) -> BookingResult<CancelOutcome>;

    /// Claims the earliest waiting booking and queues its confirmation.
    async fn promote(&self, event_id: &str, now_ms: u64) -> BookingResult<PromoteOutcome>;

    async fn fetch_booking(&self, booking_id: &Uuid) -> BookingResult<Option<Booking>>;

    async fn pending_outbox(&self, limit: usize, now_ms: u64) -> BookingResult<Vec<OutboxEntry>>;

    async fn mark_dispatched(&self, seq: i64, now_ms: u64) -> BookingResult<bool>;

    /// Runs `promote` for outbox row `seq`, dispatching the row in the same
    /// transaction. `None` when another relay already handled it.
    ///
    /// When nobody is waiting yet the released seat is held as a credit for
    /// the next waiting booking the finalizer stores.
    async fn promote_from_outbox(
        &self,
        seq: i64,
        event_id: &str,
        now_ms: u64,
    ) -> BookingResult<Option<PromoteOutcome>>;

    /// Deletes dispatched outbox rows and promotion claims of settled
    /// bookings older than `before_ms`. Returns the number of rows removed.
    async fn prune_dispatched(&self, before_ms: u64) -> BookingResult<u64>;
}
