//! Per-event seat counter.
//!
//! The only admission-control primitive is [`try_decrement`]: one conditional
//! `UPDATE` that checks and decrements in the same statement. Application code
//! never reads `remaining_seats` to decide whether to grant, so concurrent
//! callers serialize on the row inside the storage engine and the number of
//! grants can never exceed the seats present when the race started.
//!
//! There is no release path. Cancelled seats are handed to the waitlist by
//! promotion; `remaining_seats` is never incremented back. A released seat
//! that finds no finalized waiter is parked as a seat credit, which the next
//! waiting booking of that event redeems when it is finalized.

use sqlx::{AnyConnection, AnyPool, Row};
use tracing::{debug, instrument};

use crate::error::BookingResult;
use crate::time::ms_to_i64;

/// Outcome of one admission attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// A seat was taken. `version` is the fencing token after the grant.
    Granted { remaining: i64, version: i64 },
    /// No seat left (or unknown event).
    Exhausted,
}

impl Admission {
    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InventorySnapshot {
    pub remaining_seats: i64,
    pub version: i64,
}

/// Pool-level handle for operators and tests. Admission itself goes through
/// [`try_decrement`] inside the reservation transaction.
#[derive(Clone)]
pub struct SeatInventory {
    pool: AnyPool,
}

impl SeatInventory {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    /// Creates the event's counter, or resets it to `seats` if it exists.
    #[instrument(skip(self), target = "inventory")]
    pub async fn seed_event(&self, event_id: &str, seats: u32) -> BookingResult<()> {
        sqlx::query(
            r#"
INSERT INTO available_seats (event_id, remaining_seats, version)
VALUES (?, ?, 1)
ON CONFLICT(event_id) DO UPDATE SET
  remaining_seats = excluded.remaining_seats,
  version = available_seats.version + 1;
"#,
        )
        .bind(event_id.to_string())
        .bind(i64::from(seats))
        .execute(&self.pool)
        .await?;

        debug!(seats, "event inventory seeded");
        Ok(())
    }

    pub async fn try_decrement(&self, event_id: &str) -> BookingResult<Admission> {
        let mut conn = self.pool.acquire().await?;
        try_decrement(&mut conn, event_id).await
    }

    pub async fn snapshot(&self, event_id: &str) -> BookingResult<Option<InventorySnapshot>> {
        let row = sqlx::query(
            "SELECT remaining_seats, version FROM available_seats WHERE event_id = ?;",
        )
        .bind(event_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(InventorySnapshot {
                remaining_seats: r.try_get("remaining_seats")?,
                version: r.try_get("version")?,
            })),
            None => Ok(None),
        }
    }
}

/// Atomic conditional decrement; bumps `version` on every grant.
#[instrument(skip(conn), target = "inventory")]
pub async fn try_decrement(conn: &mut AnyConnection, event_id: &str) -> BookingResult<Admission> {
    let row = sqlx::query(
        r#"
UPDATE available_seats
SET remaining_seats = remaining_seats - 1,
    version = version + 1
WHERE event_id = ? AND remaining_seats > 0
RETURNING remaining_seats, version;
"#,
    )
    .bind(event_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    let admission = match row {
        Some(r) => Admission::Granted {
            remaining: r.try_get("remaining_seats")?,
            version: r.try_get("version")?,
        },
        None => Admission::Exhausted,
    };

    debug!(?admission, "decrement attempted");
    Ok(admission)
}

/// Parks a released seat of `event_id` until a waiting booking can take it.
pub(crate) async fn hold_seat_credit(
    conn: &mut AnyConnection,
    event_id: &str,
    now_ms: u64,
) -> BookingResult<()> {
    sqlx::query("INSERT INTO seat_credits (event_id, created_ms) VALUES (?, ?);")
        .bind(event_id.to_string())
        .bind(ms_to_i64(now_ms))
        .execute(&mut *conn)
        .await?;

    debug!(event_id, "released seat held for the next waiter");
    Ok(())
}

/// Oldest unredeemed credit of `event_id`, if any.
pub(crate) async fn oldest_seat_credit(
    conn: &mut AnyConnection,
    event_id: &str,
) -> BookingResult<Option<i64>> {
    let row = sqlx::query(
        "SELECT seq FROM seat_credits WHERE event_id = ? ORDER BY seq ASC LIMIT 1;",
    )
    .bind(event_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(r) => Ok(Some(r.try_get("seq")?)),
        None => Ok(None),
    }
}

pub(crate) async fn redeem_seat_credit(conn: &mut AnyConnection, seq: i64) -> BookingResult<bool> {
    let res = sqlx::query("DELETE FROM seat_credits WHERE seq = ?;")
        .bind(seq)
        .execute(&mut *conn)
        .await?;

    Ok(res.rows_affected() == 1)
}
