use async_trait::async_trait;
use sqlx::{AnyConnection, AnyPool};
use tracing::debug;
use uuid::Uuid;

use crate::bookings::model::Booking;
use crate::bookings::repository_sqlx::{
    cancel_booking, claim_next_waiting, fetch_booking, prune_settled_promotions,
};
use crate::error::BookingResult;
use crate::inventory::{self, Admission};
use crate::outbox::{self, OutboxEntry, OutboxMessage};
use crate::queue::instruction::{FulfillmentInstruction, FulfillmentStatus};
use crate::reservation::repository::ReservationRepository;
use crate::reservation::types::{CancelOutcome, PromoteOutcome, ReservationRequest};

/// SQLx-backed implementation of ReservationRepository.
///
/// Each transaction opens with a write so SQLite takes the write lock up
/// front instead of upgrading a read lock mid-transaction.
#[derive(Clone)]
pub struct SqlxReservationRepository {
    pool: AnyPool,
}

impl SqlxReservationRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReservationRepository for SqlxReservationRepository {
    async fn admit(
        &self,
        booking_id: Uuid,
        request: &ReservationRequest,
        now_ms: u64,
    ) -> BookingResult<Admission> {
        let mut tx = self.pool.begin().await?;

        let admission = inventory::try_decrement(&mut *tx, &request.event_id).await?;
        let status = if admission.is_granted() {
            FulfillmentStatus::Confirmed
        } else {
            FulfillmentStatus::Waiting
        };

        let instruction = request.instruction(booking_id, status, now_ms);
        outbox::append(&mut *tx, &OutboxMessage::Fulfill(instruction), now_ms).await?;

        tx.commit().await?;
        Ok(admission)
    }

    async fn cancel(&self, booking_id: &Uuid, now_ms: u64) -> BookingResult<CancelOutcome> {
        let mut tx = self.pool.begin().await?;

        let outcome = match cancel_booking(&mut *tx, booking_id, now_ms).await? {
            Some((event_id, released_seat)) => {
                if released_seat {
                    outbox::append(
                        &mut *tx,
                        &OutboxMessage::Promote {
                            event_id: event_id.clone(),
                        },
                        now_ms,
                    )
                    .await?;
                }
                debug!(%event_id, released_seat, "booking canceled");
                CancelOutcome::Cancelled { event_id }
            }
            None => match fetch_booking(&mut *tx, booking_id).await? {
                Some(_) => CancelOutcome::AlreadyCancelled,
                None => CancelOutcome::NotFound,
            },
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn promote(&self, event_id: &str, now_ms: u64) -> BookingResult<PromoteOutcome> {
        let mut tx = self.pool.begin().await?;
        let outcome = promote_in(&mut *tx, event_id, now_ms).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn fetch_booking(&self, booking_id: &Uuid) -> BookingResult<Option<Booking>> {
        let mut conn = self.pool.acquire().await?;
        fetch_booking(&mut conn, booking_id).await
    }

    async fn pending_outbox(&self, limit: usize, now_ms: u64) -> BookingResult<Vec<OutboxEntry>> {
        let mut conn = self.pool.acquire().await?;
        outbox::pending(&mut conn, limit, now_ms).await
    }

    async fn mark_dispatched(&self, seq: i64, now_ms: u64) -> BookingResult<bool> {
        let mut conn = self.pool.acquire().await?;
        outbox::mark_dispatched(&mut conn, seq, now_ms).await
    }

    async fn promote_from_outbox(
        &self,
        seq: i64,
        event_id: &str,
        now_ms: u64,
    ) -> BookingResult<Option<PromoteOutcome>> {
        let mut tx = self.pool.begin().await?;

        if !outbox::mark_dispatched(&mut *tx, seq, now_ms).await? {
            tx.rollback().await?;
            return Ok(None);
        }

        let outcome = promote_in(&mut *tx, event_id, now_ms).await?;
        if outcome == PromoteOutcome::NoneWaiting {
            // The waiter may still be in flight to the finalizer.
            inventory::hold_seat_credit(&mut *tx, event_id, now_ms).await?;
        }

        tx.commit().await?;
        Ok(Some(outcome))
    }

    async fn prune_dispatched(&self, before_ms: u64) -> BookingResult<u64> {
        let mut tx = self.pool.begin().await?;
        let outbox_rows = outbox::prune_dispatched(&mut *tx, before_ms).await?;
        let claims = prune_settled_promotions(&mut *tx, before_ms).await?;
        tx.commit().await?;
        Ok(outbox_rows + claims)
    }
}

/// Spends the oldest seat credit of `event_id` on the earliest unclaimed
/// waiting booking. `None` when there is no credit or no one to promote; the
/// credit is kept in the latter case.
pub(crate) async fn spend_seat_credit(
    conn: &mut AnyConnection,
    event_id: &str,
    now_ms: u64,
) -> BookingResult<Option<Uuid>> {
    let Some(credit) = inventory::oldest_seat_credit(&mut *conn, event_id).await? else {
        return Ok(None);
    };

    match promote_in(&mut *conn, event_id, now_ms).await? {
        PromoteOutcome::Promoted(booking_id) => {
            inventory::redeem_seat_credit(&mut *conn, credit).await?;
            Ok(Some(booking_id))
        }
        PromoteOutcome::NoneWaiting => Ok(None),
    }
}

async fn promote_in(
    conn: &mut AnyConnection,
    event_id: &str,
    now_ms: u64,
) -> BookingResult<PromoteOutcome> {
    let Some(booking) = claim_next_waiting(&mut *conn, event_id, now_ms).await? else {
        return Ok(PromoteOutcome::NoneWaiting);
    };

    let instruction = FulfillmentInstruction {
        booking_id: booking.booking_id,
        event_id: booking.event_id,
        user_id: booking.user_id,
        user_email: booking.user_email,
        event_name: booking.event_name,
        status: FulfillmentStatus::Confirmed,
        requested_ms: Some(booking.created_ms),
    };
    outbox::append(&mut *conn, &OutboxMessage::Fulfill(instruction), now_ms).await?;

    Ok(PromoteOutcome::Promoted(booking.booking_id))
}
