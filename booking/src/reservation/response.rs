//! Boundary payloads returned to clients (CLI / HTTP callers).

use serde::{Deserialize, Serialize};

use crate::bookings::model::Booking;
use crate::reservation::types::{CancelOutcome, ReserveOutcome};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveResponse {
    pub status: String,
    pub message: String,
    pub reservation_id: Option<String>,
}

impl From<ReserveOutcome> for ReserveResponse {
    fn from(outcome: ReserveOutcome) -> Self {
        match outcome {
            ReserveOutcome::Reserved(id) => Self {
                status: "RESERVED".into(),
                message: "Seat reserved. Your booking is being processed.".into(),
                reservation_id: Some(id.to_string()),
            },
            ReserveOutcome::Waitlisted { .. } => Self {
                status: "WAITLISTED".into(),
                message: "Event is full. You are added to waitlist.".into(),
                reservation_id: None,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub status: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

impl From<CancelOutcome> for CancelResponse {
    fn from(outcome: CancelOutcome) -> Self {
        match outcome {
            CancelOutcome::NotFound => Self {
                status: "NOT_FOUND".into(),
                message: "Booking not found".into(),
                event_id: None,
            },
            CancelOutcome::AlreadyCancelled => Self {
                status: "ALREADY_CANCELLED".into(),
                message: "Booking is already cancelled".into(),
                event_id: None,
            },
            CancelOutcome::Cancelled { event_id } => Self {
                status: "CANCELLED_SUCCESSFULLY".into(),
                message: "Booking cancelled".into(),
                event_id: Some(event_id),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
}

impl From<Option<Booking>> for StatusResponse {
    fn from(booking: Option<Booking>) -> Self {
        match booking {
            Some(b) => Self {
                status: b.status.to_string(),
                message: format!("Booking {}", b.status),
            },
            None => Self {
                status: "NOT_FOUND".into(),
                message: "Reservation ID not found".into(),
            },
        }
    }
}
