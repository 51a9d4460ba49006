use uuid::Uuid;

use crate::queue::instruction::{FulfillmentInstruction, FulfillmentStatus};

/// Client request to book one seat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReservationRequest {
    pub event_id: String,
    pub user_id: String,
    pub user_email: String,
    pub event_name: String,
}

impl ReservationRequest {
    pub fn new(
        event_id: impl Into<String>,
        user_id: impl Into<String>,
        user_email: impl Into<String>,
        event_name: impl Into<String>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            user_id: user_id.into(),
            user_email: user_email.into(),
            event_name: event_name.into(),
        }
    }

    /// Instruction for the finalizer; `requested_ms` pins the waitlist position.
    pub fn instruction(
        &self,
        booking_id: Uuid,
        status: FulfillmentStatus,
        requested_ms: u64,
    ) -> FulfillmentInstruction {
        FulfillmentInstruction {
            booking_id,
            event_id: self.event_id.clone(),
            user_id: self.user_id.clone(),
            user_email: self.user_email.clone(),
            event_name: self.event_name.clone(),
            status,
            requested_ms: Some(requested_ms),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReserveOutcome {
    Reserved(Uuid),
    /// The id is kept internally (logs, tests) but never shown to the client.
    Waitlisted { booking_id: Uuid },
}

impl ReserveOutcome {
    pub fn booking_id(&self) -> Uuid {
        match self {
            ReserveOutcome::Reserved(id) => *id,
            ReserveOutcome::Waitlisted { booking_id } => *booking_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    NotFound,
    AlreadyCancelled,
    Cancelled { event_id: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromoteOutcome {
    Promoted(Uuid),
    NoneWaiting,
}
