//! Fulfillment queue: durable, at-least-once, no transport-level dedup.
//!
//! Consumers lease a message with [`FulfillmentQueue::receive`] and must
//! either [`ack`](FulfillmentQueue::ack) it after the handler committed, or
//! [`reject`](FulfillmentQueue::reject) it. A consumer that dies holding a
//! lease simply lets it expire and the message is delivered again, so every
//! handler must be idempotent on `reservation_id`.

pub mod instruction;
pub mod retry;
pub mod sqlx_queue;

use async_trait::async_trait;

use crate::error::QueueError;
use instruction::FulfillmentInstruction;

/// One leased message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub seq: i64,
    pub message_id: String,
    /// Raw body; decoding is the consumer's job so poison payloads can be parked.
    pub payload: String,
    /// Delivery count including this one.
    pub attempts: u32,
    pub lease_until_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectOutcome {
    Requeued { retry_at_ms: u64 },
    DeadLettered,
}

#[async_trait]
pub trait FulfillmentQueue: Send + Sync {
    /// Durably enqueue; returns once stored, never waits for consumption.
    async fn publish(&self, instruction: &FulfillmentInstruction) -> Result<(), QueueError>;

    /// Lease the next deliverable message, if any.
    async fn receive(&self) -> Result<Option<Delivery>, QueueError>;

    /// Handler finished; remove the message.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Handler failed; redeliver later or dead-letter once the retry budget is spent.
    async fn reject(&self, delivery: &Delivery, reason: &str) -> Result<RejectOutcome, QueueError>;

    /// Park a message that can never succeed (e.g. undecodable payload).
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError>;
}
