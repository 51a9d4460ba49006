//! Transactional outbox.
//!
//! Every state change that must reach the fulfillment queue is recorded here
//! in the same transaction as the change itself (seat decrement, cancellation,
//! promotion claim). [`relay::OutboxRelay`] drains pending rows afterwards, so
//! a crash between "decide" and "publish" delays the instruction instead of
//! losing it.

pub mod relay;

use serde::{Deserialize, Serialize};
use sqlx::{AnyConnection, Row};
use tracing::warn;

use crate::error::BookingResult;
use crate::queue::instruction::FulfillmentInstruction;
use crate::time::ms_to_i64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboxMessage {
    /// Forward this instruction to the fulfillment queue.
    Fulfill(FulfillmentInstruction),
    /// A seat of `event_id` was released; promote the next waiting booking.
    Promote { event_id: String },
}

impl OutboxMessage {
    fn kind(&self) -> &'static str {
        match self {
            OutboxMessage::Fulfill(_) => "fulfill",
            OutboxMessage::Promote { .. } => "promote",
        }
    }

    fn event_id(&self) -> &str {
        match self {
            OutboxMessage::Fulfill(i) => &i.event_id,
            OutboxMessage::Promote { event_id } => event_id,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct PromotePayload {
    event_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxEntry {
    pub seq: i64,
    pub message: OutboxMessage,
}

pub(crate) async fn append(
    conn: &mut AnyConnection,
    message: &OutboxMessage,
    now_ms: u64,
) -> BookingResult<()> {
    let payload = match message {
        OutboxMessage::Fulfill(i) => serde_json::to_string(i)?,
        OutboxMessage::Promote { event_id } => serde_json::to_string(&PromotePayload {
            event_id: event_id.clone(),
        })?,
    };

    sqlx::query(
        r#"
INSERT INTO outbox (kind, event_id, payload, created_ms, dispatched_ms)
VALUES (?, ?, ?, ?, NULL);
"#,
    )
    .bind(message.kind())
    .bind(message.event_id().to_string())
    .bind(payload)
    .bind(ms_to_i64(now_ms))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Oldest undispatched entries first.
///
/// Rows that cannot be decoded are marked dispatched and skipped so one bad
/// row never blocks the rest of the outbox.
pub(crate) async fn pending(
    conn: &mut AnyConnection,
    limit: usize,
    now_ms: u64,
) -> BookingResult<Vec<OutboxEntry>> {
    let rows = sqlx::query(
        r#"
SELECT seq, kind, payload
FROM outbox
WHERE dispatched_ms IS NULL
ORDER BY seq ASC
LIMIT ?;
"#,
    )
    .bind(i64::try_from(limit).unwrap_or(i64::MAX))
    .fetch_all(&mut *conn)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for r in rows {
        let seq: i64 = r.try_get("seq")?;
        let kind: String = r.try_get("kind")?;
        let payload: String = r.try_get("payload")?;

        match decode(&kind, &payload) {
            Ok(message) => out.push(OutboxEntry { seq, message }),
            Err(e) => {
                warn!(seq, kind = %kind, error = %e, "skipping malformed outbox row");
                mark_dispatched(conn, seq, now_ms).await?;
            }
        }
    }

    Ok(out)
}

/// Returns false when another relay already dispatched the row.
pub(crate) async fn mark_dispatched(
    conn: &mut AnyConnection,
    seq: i64,
    now_ms: u64,
) -> BookingResult<bool> {
    let res = sqlx::query(
        "UPDATE outbox SET dispatched_ms = ? WHERE seq = ? AND dispatched_ms IS NULL;",
    )
    .bind(ms_to_i64(now_ms))
    .bind(seq)
    .execute(&mut *conn)
    .await?;

    Ok(res.rows_affected() == 1)
}

pub(crate) async fn prune_dispatched(conn: &mut AnyConnection, before_ms: u64) -> BookingResult<u64> {
    let res = sqlx::query(
        "DELETE FROM outbox WHERE dispatched_ms IS NOT NULL AND dispatched_ms <= ?;",
    )
    .bind(ms_to_i64(before_ms))
    .execute(&mut *conn)
    .await?;

    Ok(res.rows_affected())
}

fn decode(kind: &str, payload: &str) -> Result<OutboxMessage, String> {
    match kind {
        "fulfill" => serde_json::from_str::<FulfillmentInstruction>(payload)
            .map(OutboxMessage::Fulfill)
            .map_err(|e| e.to_string()),
        "promote" => serde_json::from_str::<PromotePayload>(payload)
            .map(|p| OutboxMessage::Promote {
                event_id: p.event_id,
            })
            .map_err(|e| e.to_string()),
        other => Err(format!("unknown outbox kind: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_promote_payload() {
        let m = decode("promote", r#"{"event_id":"evt-9"}"#).unwrap();
        assert_eq!(
            m,
            OutboxMessage::Promote {
                event_id: "evt-9".into()
            }
        );
    }

    #[test]
    fn rejects_unknown_kind_and_bad_json() {
        assert!(decode("refund", "{}").is_err());
        assert!(decode("fulfill", "not json").is_err());
    }
}
