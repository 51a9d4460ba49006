use async_trait::async_trait;
use sqlx::any::AnyRow;
use sqlx::{AnyConnection, AnyPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::bookings::model::{Booking, BookingStatus, UpsertOutcome};
use crate::bookings::repository::BookingStore;
use crate::error::{BookingError, BookingResult};
use crate::queue::instruction::{FulfillmentInstruction, FulfillmentStatus};
use crate::reservation::repository_sqlx::spend_seat_credit;
use crate::time::ms_to_i64;

/// SQLx-backed implementation of BookingStore.
/// Responsible only for persistence and row mapping.
#[derive(Clone)]
pub struct SqlxBookingStore {
    pool: AnyPool,
}

impl SqlxBookingStore {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookingStore for SqlxBookingStore {
    async fn upsert(
        &self,
        instruction: &FulfillmentInstruction,
        now_ms: u64,
    ) -> BookingResult<UpsertOutcome> {
        let mut tx = self.pool.begin().await?;
        let outcome = upsert_booking(&mut *tx, instruction, now_ms).await?;

        if outcome == UpsertOutcome::Applied && instruction.status == FulfillmentStatus::Waiting {
            if let Some(promoted) =
                spend_seat_credit(&mut *tx, &instruction.event_id, now_ms).await?
            {
                info!(
                    event_id = %instruction.event_id,
                    booking_id = %promoted,
                    "held seat handed to waitlist"
                );
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn fetch(&self, booking_id: &Uuid) -> BookingResult<Option<Booking>> {
        let mut conn = self.pool.acquire().await?;
        fetch_booking(&mut conn, booking_id).await
    }
}

/* =========================
Connection-level statements
(composable inside a transaction)
========================= */

const BOOKING_COLUMNS: &str = r#"
  booking_id, event_id, user_id, user_email, event_name,
  status, released_seat, created_ms, updated_ms
"#;

/// Insert if absent, otherwise overwrite every mutable field.
///
/// The `WHERE` on the conflict branch keeps `canceled` terminal and stops a
/// stale `waiting` redelivery from demoting a confirmed booking. `created_ms`
/// is written once.
pub(crate) async fn upsert_booking(
    conn: &mut AnyConnection,
    instruction: &FulfillmentInstruction,
    now_ms: u64,
) -> BookingResult<UpsertOutcome> {
    let status = BookingStatus::from(instruction.status);
    let created_ms = instruction.requested_ms.unwrap_or(now_ms);

    let res = sqlx::query(
        r#"
INSERT INTO bookings (
  booking_id, event_id, user_id, user_email, event_name,
  status, released_seat, created_ms, updated_ms
)
VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)
ON CONFLICT(booking_id) DO UPDATE SET
  status = excluded.status,
  event_id = excluded.event_id,
  user_id = excluded.user_id,
  user_email = excluded.user_email,
  event_name = excluded.event_name,
  updated_ms = excluded.updated_ms
WHERE bookings.status <> 'canceled'
  AND NOT (bookings.status = 'confirmed' AND excluded.status = 'waiting');
"#,
    )
    .bind(instruction.booking_id.to_string())
    .bind(instruction.event_id.clone())
    .bind(instruction.user_id.clone())
    .bind(instruction.user_email.clone())
    .bind(instruction.event_name.clone())
    .bind(status.as_str())
    .bind(ms_to_i64(created_ms))
    .bind(ms_to_i64(now_ms))
    .execute(&mut *conn)
    .await?;

    if res.rows_affected() > 0 {
        return Ok(UpsertOutcome::Applied);
    }

    // Conflict branch filtered out: report what is stored instead.
    match fetch_booking(conn, &instruction.booking_id).await? {
        Some(current) => Ok(UpsertOutcome::Superseded(current.status)),
        None => Err(BookingError::CorruptRow(format!(
            "upsert of {} affected no row and no row exists",
            instruction.booking_id
        ))),
    }
}

pub(crate) async fn fetch_booking(
    conn: &mut AnyConnection,
    booking_id: &Uuid,
) -> BookingResult<Option<Booking>> {
    let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE booking_id = ?;");
    let row = sqlx::query(&sql)
        .bind(booking_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(row_to_booking).transpose()
}

/// Marks a booking canceled. Returns `(event_id, released_seat)` when a row
/// changed, `None` when it is missing or already canceled.
///
/// `released_seat` is computed from the pre-update row: a confirmed booking,
/// or a waiting one already claimed by a promotion, gives its seat back.
pub(crate) async fn cancel_booking(
    conn: &mut AnyConnection,
    booking_id: &Uuid,
    now_ms: u64,
) -> BookingResult<Option<(String, bool)>> {
    let row = sqlx::query(
        r#"
UPDATE bookings
SET status = 'canceled',
    released_seat = CASE
      WHEN status = 'confirmed' THEN 1
      WHEN EXISTS (SELECT 1 FROM promotions p WHERE p.booking_id = bookings.booking_id) THEN 1
      ELSE 0
    END,
    updated_ms = ?
WHERE booking_id = ? AND status <> 'canceled'
RETURNING event_id, released_seat;
"#,
    )
    .bind(ms_to_i64(now_ms))
    .bind(booking_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(r) => {
            let event_id: String = r.try_get("event_id")?;
            let released: i64 = r.try_get("released_seat")?;
            Ok(Some((event_id, released == 1)))
        }
        None => Ok(None),
    }
}

/// Claims the earliest unclaimed waiting booking of `event_id`.
///
/// Single `INSERT .. SELECT` so two concurrent promotions can never claim the
/// same booking (primary key on `promotions.booking_id`).
pub(crate) async fn claim_next_waiting(
    conn: &mut AnyConnection,
    event_id: &str,
    now_ms: u64,
) -> BookingResult<Option<Booking>> {
    let claimed = sqlx::query(
        r#"
INSERT INTO promotions (booking_id, event_id, promoted_ms)
SELECT b.booking_id, b.event_id, ?
FROM bookings b
WHERE b.event_id = ?
  AND b.status = 'waiting'
  AND NOT EXISTS (SELECT 1 FROM promotions p WHERE p.booking_id = b.booking_id)
ORDER BY b.created_ms ASC
LIMIT 1
RETURNING booking_id;
"#,
    )
    .bind(ms_to_i64(now_ms))
    .bind(event_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = claimed else {
        return Ok(None);
    };

    let id = parse_uuid(&row.try_get::<String, _>("booking_id")?)?;
    fetch_booking(conn, &id).await
}

/// Drops promotion claims whose booking has left `waiting`. Only waiting
/// bookings consult their claim.
pub(crate) async fn prune_settled_promotions(
    conn: &mut AnyConnection,
    before_ms: u64,
) -> BookingResult<u64> {
    let res = sqlx::query(
        r#"
DELETE FROM promotions
WHERE promoted_ms <= ?
  AND booking_id IN (SELECT booking_id FROM bookings WHERE status <> 'waiting');
"#,
    )
    .bind(ms_to_i64(before_ms))
    .execute(&mut *conn)
    .await?;

    Ok(res.rows_affected())
}

/* =========================
Row mapping
========================= */

fn row_to_booking(r: &AnyRow) -> BookingResult<Booking> {
    let status_str: String = r.try_get("status")?;
    let status = status_str
        .parse::<BookingStatus>()
        .map_err(BookingError::CorruptRow)?;

    Ok(Booking {
        booking_id: parse_uuid(&r.try_get::<String, _>("booking_id")?)?,
        event_id: r.try_get("event_id")?,
        user_id: r.try_get("user_id")?,
        user_email: r.try_get("user_email")?,
        event_name: r.try_get("event_name")?,
        status,
        released_seat: r.try_get::<i64, _>("released_seat")? == 1,
        created_ms: i64_to_ms(r.try_get("created_ms")?)?,
        updated_ms: i64_to_ms(r.try_get("updated_ms")?)?,
    })
}

fn parse_uuid(s: &str) -> BookingResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| BookingError::CorruptRow(format!("invalid booking_id {s}: {e}")))
}

fn i64_to_ms(v: i64) -> BookingResult<u64> {
    u64::try_from(v).map_err(|_| BookingError::CorruptRow(format!("negative timestamp: {v}")))
}
