//! Transactional outbox: messages enqueued inside the task-creating
//! transaction, relayed to the bus by a background loop.
//!
//! A crash between "task row committed" and "command published" can't lose
//! work; the outbox row survives and the relay delivers it later. A crash
//! between broker ack and `sent_at` yields a duplicate, which downstream
//! consumers tolerate (at-least-once).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use murmur_bus::MessageBus;
use murmur_contracts::Message;

const DEFAULT_BATCH_SIZE: i64 = 100;

/// An enqueued-but-possibly-undelivered message.
#[derive(Debug, Clone)]
pub struct OutboxRow {
    pub id: i64,
    pub message: Message,
}

/// Where the relay reads pending messages from. `PgStore` implements this
/// over the `outbox_messages` table; tests use the in-memory store.
#[async_trait]
pub trait OutboxSource: Send + Sync {
    /// Undelivered messages, oldest first.
    async fn fetch_unsent(&self, limit: i64) -> Result<Vec<OutboxRow>>;

    /// Record broker acknowledgment. Called only after a successful publish.
    async fn mark_sent(&self, id: i64) -> Result<()>;
}

/// Write one message into the outbox within the caller's transaction.
/// This is the only way messages enter the outbox; there is no
/// publish-without-transaction path.
pub async fn enqueue_message(
    tx: &mut Transaction<'_, Postgres>,
    message: &Message,
) -> Result<()> {
    let payload = serde_json::to_value(message)?;
    sqlx::query("INSERT INTO outbox_messages (kind, payload) VALUES ($1, $2)")
        .bind(message.kind().to_string())
        .bind(payload)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

/// Background loop that drains the outbox into the bus.
pub struct OutboxRelay {
    source: Arc<dyn OutboxSource>,
    bus: Arc<dyn MessageBus>,
    poll_interval: Duration,
    batch_size: i64,
}

impl OutboxRelay {
    pub fn new(
        source: Arc<dyn OutboxSource>,
        bus: Arc<dyn MessageBus>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            bus,
            poll_interval,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// One relay pass. Returns how many messages were delivered. A publish
    /// failure stops the pass; the remaining rows stay unsent and the next
    /// tick retries from the oldest.
    pub async fn run_once(&self) -> Result<usize> {
        let pending = self.source.fetch_unsent(self.batch_size).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let mut delivered = 0;
        for row in pending {
            match self.bus.publish(&row.message).await {
                Ok(()) => {
                    self.source.mark_sent(row.id).await?;
                    delivered += 1;
                }
                Err(e) => {
                    warn!(
                        outbox_id = row.id,
                        error = %e,
                        "Outbox publish failed, will retry next tick"
                    );
                    break;
                }
            }
        }

        if delivered > 0 {
            debug!(delivered, "Outbox relay pass complete");
        }
        Ok(delivered)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Outbox relay started");
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        warn!(error = %e, "Outbox relay pass failed");
                    }
                }
            }
        }

        info!("Outbox relay stopped");
    }
}
