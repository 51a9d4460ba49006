use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted booking status.
///
/// Allowed transitions: `waiting -> confirmed` (promotion) and any
/// non-canceled status `-> canceled`. Nothing leaves `canceled`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Confirmed,
    Waiting,
    Canceled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Waiting => "waiting",
            BookingStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Canceled)
    }

    /// Whether a finalizer write carrying `next` may replace `self`.
    ///
    /// Mirrors the guard on the upsert statement in `repository_sqlx`.
    pub fn accepts(&self, next: BookingStatus) -> bool {
        match (self, next) {
            (BookingStatus::Canceled, _) => false,
            (BookingStatus::Confirmed, BookingStatus::Waiting) => false,
            _ => true,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(BookingStatus::Confirmed),
            "waiting" => Ok(BookingStatus::Waiting),
            // legacy spelling
            "canceled" | "cancelled" => Ok(BookingStatus::Canceled),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

/// A materialized booking row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Booking {
    pub booking_id: Uuid,
    pub event_id: String,
    pub user_id: String,
    pub user_email: String,
    pub event_name: String,
    pub status: BookingStatus,
    /// Set on cancellation when the booking held (or was being promoted into) a seat.
    pub released_seat: bool,
    /// FIFO key for the waitlist.
    pub created_ms: u64,
    pub updated_ms: u64,
}

/// Result of a finalizer upsert.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Row inserted or overwritten with the instruction's values.
    Applied,
    /// Stored row already moved past the instruction (canceled, or confirmed
    /// vs. a stale waiting redelivery); nothing was written.
    Superseded(BookingStatus),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canceled_is_terminal() {
        for next in [
            BookingStatus::Confirmed,
            BookingStatus::Waiting,
            BookingStatus::Canceled,
        ] {
            assert!(!BookingStatus::Canceled.accepts(next));
        }
        assert!(BookingStatus::Canceled.is_terminal());
    }

    #[test]
    fn promotion_is_the_only_upgrade_from_waiting() {
        assert!(BookingStatus::Waiting.accepts(BookingStatus::Confirmed));
        assert!(BookingStatus::Waiting.accepts(BookingStatus::Waiting));
        assert!(!BookingStatus::Confirmed.accepts(BookingStatus::Waiting));
        assert!(BookingStatus::Confirmed.accepts(BookingStatus::Confirmed));
    }

    #[test]
    fn parses_both_cancel_spellings() {
        assert_eq!(
            "cancelled".parse::<BookingStatus>().unwrap(),
            BookingStatus::Canceled
        );
        assert_eq!(
            "canceled".parse::<BookingStatus>().unwrap(),
            BookingStatus::Canceled
        );
        assert!("RESERVED".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn serde_uses_lowercase_wire_names() {
        let s = serde_json::to_string(&BookingStatus::Waiting).unwrap();
        assert_eq!(s, "\"waiting\"");
    }
}
