//! Message broker boundary.
//!
//! The pipeline only assumes "durable, at-least-once, no cross-key ordering".
//! `PgBus` is the durable deployment implementation (append-only log plus
//! per-group cursors); `MemoryBus` backs the tests.

pub mod memory;
pub mod pg;

pub use memory::MemoryBus;
pub use pg::PgBus;

use anyhow::Result;
use async_trait::async_trait;

use murmur_contracts::{Message, MessageKind};

/// A message handed to a consumer. `seq` is the broker-assigned position,
/// used only for acknowledgment.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub seq: i64,
    pub message: Message,
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Durably publish one message.
    async fn publish(&self, message: &Message) -> Result<()>;

    /// Open a consumer for `group`, receiving only the given kinds.
    /// Each group has its own position; separate groups each see every
    /// matching message.
    async fn consumer(&self, group: &str, kinds: &[MessageKind]) -> Result<Box<dyn BusConsumer>>;
}

#[async_trait]
pub trait BusConsumer: Send {
    /// The next matching message. Suspends until one is available; returns
    /// None only when the bus has been closed (in-memory shutdown path).
    async fn next(&mut self) -> Result<Option<Delivery>>;

    /// Acknowledge a delivery. Un-acked deliveries are redelivered to the
    /// group after a restart; the at-least-once contract.
    async fn ack(&mut self, seq: i64) -> Result<()>;
}
