//! Schema bootstrap. Statements target SQLite (the default `DATABASE_URL`).

use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Inventory: one row per event, mutated only by the conditional decrement.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS available_seats (
  event_id TEXT PRIMARY KEY,
  remaining_seats BIGINT NOT NULL CHECK (remaining_seats >= 0),
  version BIGINT NOT NULL DEFAULT 1
);
"#,
    )
    .execute(pool)
    .await?;

    // Bookings
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS bookings (
  booking_id TEXT PRIMARY KEY,
  event_id TEXT NOT NULL,
  user_id TEXT NOT NULL,
  user_email TEXT NOT NULL,
  event_name TEXT NOT NULL,
  status TEXT NOT NULL CHECK (status IN ('confirmed', 'waiting', 'canceled')),
  released_seat INTEGER NOT NULL DEFAULT 0 CHECK (released_seat IN (0,1)),
  created_ms BIGINT NOT NULL,
  updated_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Outbox: written in the same transaction as the state change it announces.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS outbox (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  kind TEXT NOT NULL CHECK (kind IN ('fulfill', 'promote')),
  event_id TEXT NOT NULL,
  payload TEXT NOT NULL,
  created_ms BIGINT NOT NULL,
  dispatched_ms BIGINT
);
"#,
    )
    .execute(pool)
    .await?;

    // Promotion claims: a waiting booking is promoted at most once.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS promotions (
  booking_id TEXT PRIMARY KEY,
  event_id TEXT NOT NULL,
  promoted_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Released seats waiting for a finalized waiter.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS seat_credits (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  event_id TEXT NOT NULL,
  created_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Durable fulfillment queue
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS fulfillment_queue (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  message_id TEXT NOT NULL UNIQUE,
  routing_key TEXT NOT NULL,
  payload TEXT NOT NULL,
  enqueued_ms BIGINT NOT NULL,
  available_ms BIGINT NOT NULL,
  lease_until_ms BIGINT NOT NULL DEFAULT 0,
  attempts INTEGER NOT NULL DEFAULT 0,
  state TEXT NOT NULL DEFAULT 'ready' CHECK (state IN ('ready', 'dead')),
  last_error TEXT
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_bookings_waitlist ON bookings(event_id, status, created_ms);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_outbox_pending ON outbox(dispatched_ms, seq);"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_seat_credits_event ON seat_credits(event_id, seq);"#)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_queue_ready ON fulfillment_queue(routing_key, state, available_ms);"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
