//! Durable bus backed by Postgres: an append-only message log plus one
//! cursor row per consumer group.
//!
//! Delivery is at-least-once. A consumer holds at most `prefetch` unacked
//! deliveries; acking advances the group cursor, and anything beyond the
//! cursor at restart is delivered again. Reads are gap-aware: a BIGSERIAL
//! gap from an in-flight insert stops the scan until it commits, while a
//! gap that outlives the grace period is a burned sequence value (aborted
//! insert; sequences never roll back) and is skipped so consumption cannot
//! stall on it.

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use tokio::time::Instant;
use tracing::warn;

use murmur_contracts::{Message, MessageKind};

use crate::{BusConsumer, Delivery, MessageBus};

const DEFAULT_PREFETCH: usize = 48;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
const DEFAULT_GAP_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct PgBus {
    pool: PgPool,
    prefetch: usize,
    poll_interval: Duration,
    gap_grace: Duration,
}

impl PgBus {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            prefetch: DEFAULT_PREFETCH,
            poll_interval: DEFAULT_POLL_INTERVAL,
            gap_grace: DEFAULT_GAP_GRACE,
        }
    }

    /// Delivery credit per consumer: how many unacked messages a consumer
    /// may hold before delivery pauses.
    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// How long a sequence gap may block the scan before it is treated as
    /// a burned value and skipped. Must comfortably exceed the longest
    /// publish transaction.
    pub fn with_gap_grace(mut self, grace: Duration) -> Self {
        self.gap_grace = grace;
        self
    }

    /// Idempotent schema setup.
    pub async fn migrate(pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bus_messages (
                seq BIGSERIAL PRIMARY KEY,
                kind TEXT NOT NULL,
                payload JSONB NOT NULL,
                published_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bus_cursors (
                consumer_group TEXT PRIMARY KEY,
                last_seq BIGINT NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl MessageBus for PgBus {
    async fn publish(&self, message: &Message) -> Result<()> {
        let payload = serde_json::to_value(message)?;
        sqlx::query("INSERT INTO bus_messages (kind, payload) VALUES ($1, $2)")
            .bind(message.kind().to_string())
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn consumer(&self, group: &str, kinds: &[MessageKind]) -> Result<Box<dyn BusConsumer>> {
        sqlx::query("INSERT INTO bus_cursors (consumer_group) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(group)
            .execute(&self.pool)
            .await?;

        let cursor = sqlx::query_as::<_, (i64,)>(
            "SELECT last_seq FROM bus_cursors WHERE consumer_group = $1",
        )
        .bind(group)
        .fetch_one(&self.pool)
        .await?
        .0;

        Ok(Box::new(PgConsumer {
            pool: self.pool.clone(),
            group: group.to_string(),
            kinds: kinds.iter().map(|k| k.to_string()).collect(),
            cursor,
            buffer: VecDeque::new(),
            unacked: 0,
            prefetch: self.prefetch,
            poll_interval: self.poll_interval,
            gaps: GapTracker::new(self.gap_grace),
        }))
    }
}

struct PgConsumer {
    pool: PgPool,
    group: String,
    kinds: Vec<String>,
    /// Position already consumed or skipped, local view. Persisted on ack.
    cursor: i64,
    buffer: VecDeque<Delivery>,
    unacked: usize,
    prefetch: usize,
    poll_interval: Duration,
    gaps: GapTracker,
}

/// Classifies a hole in the sequence: an in-flight insert that will commit
/// shortly, or a value burned by an aborted insert. Postgres sequences never
/// roll back, so a hole that outlives the grace period can only be the
/// latter and waiting on it any longer would stall the group forever.
struct GapTracker {
    grace: Duration,
    seen: Option<(i64, Instant)>,
}

impl GapTracker {
    fn new(grace: Duration) -> Self {
        Self { grace, seen: None }
    }

    /// Whether the scan should stop at a hole starting at `expected`.
    /// Returns false once the same hole has been observed for the full
    /// grace period.
    fn should_wait(&mut self, expected: i64) -> bool {
        match self.seen {
            Some((at, since)) if at == expected => {
                if since.elapsed() < self.grace {
                    return true;
                }
                self.seen = None;
                false
            }
            _ => {
                self.seen = Some((expected, Instant::now()));
                true
            }
        }
    }
}

impl PgConsumer {
    /// Refill the local buffer up to the remaining delivery credit.
    /// Messages of other kinds are skipped in place; they belong to other
    /// groups and never consume this group's credit.
    async fn refill(&mut self) -> Result<()> {
        let credit = self.prefetch.saturating_sub(self.unacked + self.buffer.len());
        if credit == 0 {
            return Ok(());
        }

        let rows = sqlx::query_as::<_, (i64, String, serde_json::Value)>(
            r#"
            SELECT seq, kind, payload
            FROM bus_messages
            WHERE seq > $1
            ORDER BY seq ASC
            LIMIT $2
            "#,
        )
        .bind(self.cursor)
        .bind(credit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut expected = self.cursor + 1;
        for (seq, kind, payload) in rows {
            if seq != expected {
                if self.gaps.should_wait(expected) {
                    // Likely an in-flight insert that has not committed
                    // yet. Stop here and pick up the rest on the next poll.
                    break;
                }
                warn!(
                    from = expected,
                    to = seq,
                    "Sequence gap outlived the grace period, skipping burned values"
                );
            }
            expected = seq + 1;

            if !self.kinds.contains(&kind) {
                self.cursor = seq;
                continue;
            }

            match serde_json::from_value::<Message>(payload) {
                Ok(message) => self.buffer.push_back(Delivery { seq, message }),
                Err(e) => {
                    // A payload this build cannot read is skipped, not
                    // redelivered forever.
                    warn!(seq, error = %e, "Undecodable bus message, skipping");
                    self.cursor = seq;
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl BusConsumer for PgConsumer {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        loop {
            if let Some(delivery) = self.buffer.pop_front() {
                self.cursor = self.cursor.max(delivery.seq);
                self.unacked += 1;
                return Ok(Some(delivery));
            }

            self.refill().await?;

            if self.buffer.is_empty() {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }

    async fn ack(&mut self, seq: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE bus_cursors
            SET last_seq = GREATEST(last_seq, $2)
            WHERE consumer_group = $1
            "#,
        )
        .bind(&self.group)
        .bind(seq)
        .execute(&self.pool)
        .await?;

        self.unacked = self.unacked.saturating_sub(1);
        Ok(())
    }
}
