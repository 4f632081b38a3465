//! In-memory bus for tests and local runs. Same trait surface as `PgBus`,
//! no durability; a consumer's position lives in the consumer itself.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use murmur_contracts::{Message, MessageKind};

use crate::{BusConsumer, Delivery, MessageBus};

#[derive(Default)]
struct Inner {
    messages: Vec<Message>,
    closed: bool,
}

#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the bus: consumers drain what is already published, then
    /// `next()` returns None.
    pub async fn close(&self) {
        self.inner.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    /// Every message published so far, in publish order. Test inspector.
    pub async fn published(&self) -> Vec<Message> {
        self.inner.lock().await.messages.clone()
    }

    /// Published messages of one kind, in publish order. Test inspector.
    pub async fn published_of_kind(&self, kind: MessageKind) -> Vec<Message> {
        self.inner
            .lock()
            .await
            .messages
            .iter()
            .filter(|m| m.kind() == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, message: &Message) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            anyhow::bail!("bus is closed");
        }
        inner.messages.push(message.clone());
        drop(inner);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn consumer(&self, _group: &str, kinds: &[MessageKind]) -> Result<Box<dyn BusConsumer>> {
        Ok(Box::new(MemoryConsumer {
            inner: self.inner.clone(),
            notify: self.notify.clone(),
            kinds: kinds.to_vec(),
            cursor: 0,
        }))
    }
}

struct MemoryConsumer {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
    kinds: Vec<MessageKind>,
    cursor: usize,
}

#[async_trait]
impl BusConsumer for MemoryConsumer {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        loop {
            // Arm the wakeup before scanning so a publish between the scan
            // and the await is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let inner = self.inner.lock().await;
                while self.cursor < inner.messages.len() {
                    let seq = self.cursor as i64;
                    let message = inner.messages[self.cursor].clone();
                    self.cursor += 1;
                    if self.kinds.contains(&message.kind()) {
                        return Ok(Some(Delivery { seq, message }));
                    }
                }
                if inner.closed {
                    return Ok(None);
                }
            }

            notified.await;
        }
    }

    async fn ack(&mut self, _seq: i64) -> Result<()> {
        // Position is already advanced in next(); nothing durable to record.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn finished(task_id: Uuid) -> Message {
        Message::TaskFinished {
            task_id,
            correlation_id: task_id,
            finished_at: Utc::now(),
            query: "q".to_string(),
        }
    }

    fn queued(task_id: Uuid) -> Message {
        Message::TaskQueued {
            task_id,
            correlation_id: task_id,
            created_at: Utc::now(),
            query: "q".to_string(),
        }
    }

    #[tokio::test]
    async fn consumer_sees_only_subscribed_kinds_in_order() {
        let bus = MemoryBus::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        bus.publish(&queued(a)).await.unwrap();
        bus.publish(&finished(a)).await.unwrap();
        bus.publish(&finished(b)).await.unwrap();

        let mut consumer = bus
            .consumer("test", &[MessageKind::TaskFinished])
            .await
            .unwrap();

        let first = consumer.next().await.unwrap().unwrap();
        assert_eq!(first.message.task_id(), Some(a));
        let second = consumer.next().await.unwrap().unwrap();
        assert_eq!(second.message.task_id(), Some(b));
    }

    #[tokio::test]
    async fn next_wakes_on_publish() {
        let bus = MemoryBus::new();
        let mut consumer = bus
            .consumer("test", &[MessageKind::TaskQueued])
            .await
            .unwrap();

        let publisher = bus.clone();
        let id = Uuid::new_v4();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            publisher.publish(&queued(id)).await.unwrap();
        });

        let delivery = consumer.next().await.unwrap().unwrap();
        assert_eq!(delivery.message.task_id(), Some(id));
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let bus = MemoryBus::new();
        let id = Uuid::new_v4();
        bus.publish(&queued(id)).await.unwrap();
        bus.close().await;

        let mut consumer = bus
            .consumer("test", &[MessageKind::TaskQueued])
            .await
            .unwrap();
        assert!(consumer.next().await.unwrap().is_some());
        assert!(consumer.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn independent_groups_each_see_every_message() {
        let bus = MemoryBus::new();
        let id = Uuid::new_v4();
        bus.publish(&finished(id)).await.unwrap();

        let mut one = bus
            .consumer("one", &[MessageKind::TaskFinished])
            .await
            .unwrap();
        let mut two = bus
            .consumer("two", &[MessageKind::TaskFinished])
            .await
            .unwrap();

        assert!(one.next().await.unwrap().is_some());
        assert!(two.next().await.unwrap().is_some());
    }
}
