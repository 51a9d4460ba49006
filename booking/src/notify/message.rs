use serde::Serialize;
use uuid::Uuid;

use crate::bookings::model::BookingStatus;

/// A rendered notification, transport-agnostic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub reservation_id: String,
    pub status: BookingStatus,
}

impl Notification {
    pub fn compose(
        recipient: &str,
        event_name: &str,
        reservation_id: &Uuid,
        status: BookingStatus,
    ) -> Self {
        let (subject, headline, next_step) = match status {
            BookingStatus::Confirmed => (
                "Event Booking Confirmed!",
                "Successfully Reserved",
                "Keep this message for your records. You can use your Reservation ID \
                 to check your booking status at any time.",
            ),
            BookingStatus::Waiting => (
                "You're on the Waitlist",
                "Added to Waitlist",
                "We'll notify you as soon as a spot becomes available.",
            ),
            BookingStatus::Canceled => (
                "Event Booking Update",
                "Cancelled",
                "Your seat has been released.",
            ),
        };

        let body = format!(
            "Hello,\n\n\
             Booking {headline}.\n\n\
             Event Name: {event_name}\n\
             Reservation ID: {reservation_id}\n\
             Status: {status}\n\n\
             {next_step}\n\n\
             Best regards,\n\
             Event Team\n"
        );

        Self {
            to: recipient.to_string(),
            subject: subject.to_string(),
            body,
            reservation_id: reservation_id.to_string(),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_follows_status() {
        let id = Uuid::new_v4();
        let c = Notification::compose("a@b.c", "Gig", &id, BookingStatus::Confirmed);
        let w = Notification::compose("a@b.c", "Gig", &id, BookingStatus::Waiting);
        let x = Notification::compose("a@b.c", "Gig", &id, BookingStatus::Canceled);

        assert_eq!(c.subject, "Event Booking Confirmed!");
        assert_eq!(w.subject, "You're on the Waitlist");
        assert_eq!(x.subject, "Event Booking Update");
    }

    #[test]
    fn body_carries_event_and_reservation() {
        let id = Uuid::new_v4();
        let n = Notification::compose("a@b.c", "Rust Conf", &id, BookingStatus::Waiting);

        assert!(n.body.contains("Event Name: Rust Conf"));
        assert!(n.body.contains(&format!("Reservation ID: {id}")));
        assert!(n.body.contains("Status: waiting"));
        assert_eq!(n.to, "a@b.c");
    }
}
