use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bookings::model::BookingStatus;

/// Status an instruction may carry. Cancellation never travels through the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FulfillmentStatus {
    Confirmed,
    Waiting,
}

impl From<FulfillmentStatus> for BookingStatus {
    fn from(s: FulfillmentStatus) -> Self {
        match s {
            FulfillmentStatus::Confirmed => BookingStatus::Confirmed,
            FulfillmentStatus::Waiting => BookingStatus::Waiting,
        }
    }
}

/// Queue payload. Fully self-describing so any consumer can replay it.
///
/// Wire shape:
/// `{"reservation_id", "event_id", "user_id", "user_email", "event_name", "status"}`
/// plus an optional `requested_ms` admission timestamp.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentInstruction {
    #[serde(rename = "reservation_id")]
    pub booking_id: Uuid,
    pub event_id: String,
    pub user_id: String,
    pub user_email: String,
    pub event_name: String,
    pub status: FulfillmentStatus,

    /// Used as the booking's `created_ms` on first insert so the waitlist is
    /// ordered by admission time rather than by finalization time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_ms: Option<u64>,
}

impl FulfillmentInstruction {
    pub fn with_status(mut self, status: FulfillmentStatus) -> Self {
        self.status = status;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> FulfillmentInstruction {
        FulfillmentInstruction {
            booking_id: Uuid::nil(),
            event_id: "evt-1".into(),
            user_id: "u1".into(),
            user_email: "u1@x.com".into(),
            event_name: "Gig".into(),
            status: FulfillmentStatus::Waiting,
            requested_ms: None,
        }
    }

    #[test]
    fn wire_shape_matches_queue_contract() {
        let v = serde_json::to_value(sample()).unwrap();
        assert_eq!(
            v,
            json!({
                "reservation_id": "00000000-0000-0000-0000-000000000000",
                "event_id": "evt-1",
                "user_id": "u1",
                "user_email": "u1@x.com",
                "event_name": "Gig",
                "status": "waiting"
            })
        );
    }

    #[test]
    fn decodes_payload_without_requested_ms() {
        let raw = r#"{"reservation_id":"00000000-0000-0000-0000-000000000000","event_id":"evt-1","user_id":"u1","user_email":"u1@x.com","event_name":"Gig","status":"confirmed"}"#;
        let i: FulfillmentInstruction = serde_json::from_str(raw).unwrap();
        assert_eq!(i.status, FulfillmentStatus::Confirmed);
        assert_eq!(i.requested_ms, None);
    }

    #[test]
    fn rejects_missing_required_field() {
        let raw = r#"{"reservation_id":"00000000-0000-0000-0000-000000000000","event_id":"evt-1","status":"confirmed"}"#;
        assert!(serde_json::from_str::<FulfillmentInstruction>(raw).is_err());
    }

    #[test]
    fn rejects_canceled_status_on_the_wire() {
        let raw = r#"{"reservation_id":"00000000-0000-0000-0000-000000000000","event_id":"e","user_id":"u","user_email":"m","event_name":"n","status":"canceled"}"#;
        assert!(serde_json::from_str::<FulfillmentInstruction>(raw).is_err());
    }
}
