use async_trait::async_trait;
use uuid::Uuid;

use crate::bookings::model::{Booking, UpsertOutcome};
use crate::error::BookingResult;
use crate::queue::instruction::FulfillmentInstruction;

/// Finalizer-side view of persisted bookings.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Idempotent insert-or-overwrite keyed by `booking_id`.
    async fn upsert(
        &self,
        instruction: &FulfillmentInstruction,
        now_ms: u64,
    ) -> BookingResult<UpsertOutcome>;

    async fn fetch(&self, booking_id: &Uuid) -> BookingResult<Option<Booking>>;
}
