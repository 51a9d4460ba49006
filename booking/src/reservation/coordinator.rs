//! Client-facing reservation operations.
//!
//! The coordinator decides admission and records intent; it never writes the
//! bookings table on the reserve path. Materialization is the finalizer's job,
//! reached through the outbox and the fulfillment queue.

use std::sync::Arc;
use std::time::Duration;

use common::logger::{annotate_booking, warn_if_slow};
use tracing::{debug, field, info, instrument};
use uuid::Uuid;

use crate::bookings::model::Booking;
use crate::error::BookingResult;
use crate::metrics::counters::Counters;
use crate::reservation::repository::ReservationRepository;
use crate::reservation::types::{
    CancelOutcome, PromoteOutcome, ReservationRequest, ReserveOutcome,
};
use crate::time::now_ms;

const SLOW_TX: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct ReservationCoordinator {
    repo: Arc<dyn ReservationRepository>,
    counters: Counters,
}

impl ReservationCoordinator {
    pub fn new(repo: Arc<dyn ReservationRepository>, counters: Counters) -> Self {
        Self { repo, counters }
    }

    /// Admits or waitlists one request. Returns as soon as the decision and
    /// its instruction are committed; finalization happens later.
    #[instrument(
        skip(self, request),
        target = "reservation",
        fields(event_id = %request.event_id, booking_id = field::Empty)
    )]
    pub async fn reserve(&self, request: ReservationRequest) -> BookingResult<ReserveOutcome> {
        // Id first: it must exist before the inventory is touched.
        let booking_id = Uuid::new_v4();
        tracing::Span::current().record("booking_id", field::display(&booking_id));

        let admission = warn_if_slow("admit_tx", SLOW_TX, async {
            self.repo.admit(booking_id, &request, now_ms()).await
        })
        .await?;

        let outcome = if admission.is_granted() {
            Counters::bump(&self.counters.reserve_granted);
            ReserveOutcome::Reserved(booking_id)
        } else {
            Counters::bump(&self.counters.reserve_waitlisted);
            ReserveOutcome::Waitlisted { booking_id }
        };

        info!(?admission, "reservation decided");
        Ok(outcome)
    }

    /// Idempotent. Unparseable ids are reported as `NotFound`.
    #[instrument(skip(self), target = "reservation", fields(event_id = field::Empty))]
    pub async fn cancel(&self, booking_id: &str) -> BookingResult<CancelOutcome> {
        let Ok(id) = Uuid::parse_str(booking_id) else {
            debug!("malformed booking id");
            return Ok(CancelOutcome::NotFound);
        };

        let outcome = warn_if_slow("cancel_tx", SLOW_TX, async {
            self.repo.cancel(&id, now_ms()).await
        })
        .await?;

        match &outcome {
            CancelOutcome::Cancelled { event_id } => {
                tracing::Span::current().record("event_id", field::display(event_id));
                Counters::bump(&self.counters.cancel_applied);
                info!("booking cancelled");
            }
            CancelOutcome::AlreadyCancelled => {
                Counters::bump(&self.counters.cancel_repeated);
                debug!("booking was already cancelled");
            }
            CancelOutcome::NotFound => debug!("booking not found"),
        }

        Ok(outcome)
    }

    /// Hands one freed seat to the earliest waiting booking of `event_id`.
    ///
    /// Normally driven by the outbox relay after a cancellation; exposed for
    /// operators as well.
    #[instrument(skip(self), target = "reservation", fields(booking_id = field::Empty))]
    pub async fn promote(&self, event_id: &str) -> BookingResult<PromoteOutcome> {
        let outcome = warn_if_slow("promote_tx", SLOW_TX, async {
            self.repo.promote(event_id, now_ms()).await
        })
        .await?;

        record_promotion(&self.counters, event_id, outcome);
        Ok(outcome)
    }

    pub async fn status(&self, booking_id: &str) -> BookingResult<Option<Booking>> {
        let Ok(id) = Uuid::parse_str(booking_id) else {
            return Ok(None);
        };
        self.repo.fetch_booking(&id).await
    }
}

/// Shared with the relay, which runs promotions outside the coordinator.
pub(crate) fn record_promotion(counters: &Counters, event_id: &str, outcome: PromoteOutcome) {
    match outcome {
        PromoteOutcome::Promoted(id) => {
            annotate_booking(event_id, Some(&id.to_string()));
            Counters::bump(&counters.promoted);
            info!(booking_id = %id, "waiting booking promoted");
        }
        PromoteOutcome::NoneWaiting => {
            Counters::bump(&counters.promote_none_waiting);
            debug!(%event_id, "no waiting booking to promote");
        }
    }
}
