use std::time::Duration;

use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::QueueError;
use crate::queue::instruction::FulfillmentInstruction;
use crate::queue::retry::RetryPolicy;
use crate::queue::{Delivery, FulfillmentQueue, RejectOutcome};
use crate::time::{ms_to_i64, now_ms};

/// Table-backed durable queue.
///
/// Leasing is a single conditional `UPDATE`, so competing consumers never hold
/// the same message at once. Messages survive restarts; an expired lease makes
/// the message deliverable again.
#[derive(Clone)]
pub struct SqlxFulfillmentQueue {
    pool: AnyPool,
    routing_key: String,
    visibility_timeout: Duration,
    retry: RetryPolicy,
}

/// A parked message, for operators.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeadLetter {
    pub message_id: String,
    pub payload: String,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl SqlxFulfillmentQueue {
    pub fn new(
        pool: AnyPool,
        routing_key: impl Into<String>,
        visibility_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            pool,
            routing_key: routing_key.into(),
            visibility_timeout,
            retry,
        }
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Ready messages on this routing key (leased ones included).
    pub async fn depth(&self) -> Result<u64, QueueError> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM fulfillment_queue WHERE routing_key = ? AND state = 'ready';",
        )
        .bind(self.routing_key.clone())
        .fetch_one(&self.pool)
        .await?;

        Ok(n.max(0) as u64)
    }

    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, QueueError> {
        let rows = sqlx::query(
            r#"
SELECT message_id, payload, attempts, last_error
FROM fulfillment_queue
WHERE routing_key = ? AND state = 'dead'
ORDER BY seq ASC
LIMIT ?;
"#,
        )
        .bind(self.routing_key.clone())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            out.push(DeadLetter {
                message_id: r.try_get("message_id")?,
                payload: r.try_get("payload")?,
                attempts: r.try_get::<i64, _>("attempts")?.max(0) as u32,
                last_error: r.try_get("last_error")?,
            });
        }
        Ok(out)
    }

    /// Publishes a raw body. Used to replay parked payloads and by tests that
    /// need a malformed message on the wire.
    pub async fn publish_raw(&self, payload: String) -> Result<String, QueueError> {
        let message_id = Uuid::new_v4().to_string();
        let now = ms_to_i64(now_ms());

        sqlx::query(
            r#"
INSERT INTO fulfillment_queue (
  message_id, routing_key, payload, enqueued_ms, available_ms, lease_until_ms, attempts, state
)
VALUES (?, ?, ?, ?, ?, 0, 0, 'ready');
"#,
        )
        .bind(message_id.clone())
        .bind(self.routing_key.clone())
        .bind(payload)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(message_id)
    }
}

#[async_trait]
impl FulfillmentQueue for SqlxFulfillmentQueue {
    #[instrument(
        skip(self, instruction),
        target = "queue",
        fields(booking_id = %instruction.booking_id, status = ?instruction.status)
    )]
    async fn publish(&self, instruction: &FulfillmentInstruction) -> Result<(), QueueError> {
        let payload = serde_json::to_string(instruction)?;
        let message_id = self.publish_raw(payload).await?;
        debug!(%message_id, "instruction published");
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let now = now_ms();
        let lease_until = now.saturating_add(self.visibility_timeout.as_millis() as u64);

        let row = sqlx::query(
            r#"
UPDATE fulfillment_queue
SET attempts = attempts + 1,
    lease_until_ms = ?
WHERE seq = (
    SELECT seq FROM fulfillment_queue
    WHERE routing_key = ?
      AND state = 'ready'
      AND available_ms <= ?
      AND lease_until_ms <= ?
    ORDER BY seq ASC
    LIMIT 1
  )
  AND lease_until_ms <= ?
RETURNING seq, message_id, payload, attempts;
"#,
        )
        .bind(ms_to_i64(lease_until))
        .bind(self.routing_key.clone())
        .bind(ms_to_i64(now))
        .bind(ms_to_i64(now))
        .bind(ms_to_i64(now))
        .fetch_optional(&self.pool)
        .await?;

        let Some(r) = row else {
            return Ok(None);
        };

        let delivery = Delivery {
            seq: r.try_get("seq")?,
            message_id: r.try_get("message_id")?,
            payload: r.try_get("payload")?,
            attempts: r.try_get::<i64, _>("attempts")?.max(0) as u32,
            lease_until_ms: lease_until,
        };

        if delivery.attempts > 1 {
            debug!(
                message_id = %delivery.message_id,
                attempts = delivery.attempts,
                "redelivering message"
            );
        }

        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let res = sqlx::query("DELETE FROM fulfillment_queue WHERE seq = ? AND lease_until_ms = ?;")
            .bind(delivery.seq)
            .bind(ms_to_i64(delivery.lease_until_ms))
            .execute(&self.pool)
            .await?;

        if res.rows_affected() == 0 {
            return Err(QueueError::LeaseLost(delivery.message_id.clone()));
        }
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery, reason: &str) -> Result<RejectOutcome, QueueError> {
        if self.retry.exhausted(delivery.attempts) {
            warn!(
                message_id = %delivery.message_id,
                attempts = delivery.attempts,
                reason,
                "retry budget exhausted; dead-lettering"
            );
            self.dead_letter(delivery, reason).await?;
            return Ok(RejectOutcome::DeadLettered);
        }

        let retry_at_ms = now_ms()
            .saturating_add(self.retry.delay_for_attempt(delivery.attempts).as_millis() as u64);

        let res = sqlx::query(
            r#"
UPDATE fulfillment_queue
SET available_ms = ?, lease_until_ms = 0, last_error = ?
WHERE seq = ? AND lease_until_ms = ?;
"#,
        )
        .bind(ms_to_i64(retry_at_ms))
        .bind(truncate_reason(reason))
        .bind(delivery.seq)
        .bind(ms_to_i64(delivery.lease_until_ms))
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(QueueError::LeaseLost(delivery.message_id.clone()));
        }
        Ok(RejectOutcome::Requeued { retry_at_ms })
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        let res = sqlx::query(
            r#"
UPDATE fulfillment_queue
SET state = 'dead', lease_until_ms = 0, last_error = ?
WHERE seq = ? AND lease_until_ms = ?;
"#,
        )
        .bind(truncate_reason(reason))
        .bind(delivery.seq)
        .bind(ms_to_i64(delivery.lease_until_ms))
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(QueueError::LeaseLost(delivery.message_id.clone()));
        }
        Ok(())
    }
}

/// Keeps `last_error` bounded.
fn truncate_reason(reason: &str) -> String {
    const MAX: usize = 256;
    if reason.len() <= MAX {
        return reason.to_string();
    }
    let mut end = MAX;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &reason[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_reasons_pass_through() {
        assert_eq!(truncate_reason("db down"), "db down");
    }

    #[test]
    fn long_reasons_are_cut_on_char_boundary() {
        let long = "é".repeat(300);
        let cut = truncate_reason(&long);
        assert!(cut.len() <= 256 + "…".len());
        assert!(cut.ends_with('…'));
    }
}
