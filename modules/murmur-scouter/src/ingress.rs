//! Task ingress: lifts start commands off the bus into the in-process task
//! channel.
//!
//! Acknowledgment comes only after the channel write, so a shutdown between
//! receive and write leaves the command unacked and it is redelivered on the
//! next start. The channel is bounded and sized above the bus prefetch; when
//! dispatch falls behind, the backlog stays on the broker, not in memory.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use murmur_bus::MessageBus;
use murmur_common::{ListeningTask, TaskStatus};
use murmur_contracts::{Message, MessageKind};

const CONSUMER_GROUP: &str = "scouter";

pub struct TaskIngress {
    bus: Arc<dyn MessageBus>,
    tasks: mpsc::Sender<ListeningTask>,
}

impl TaskIngress {
    pub fn new(bus: Arc<dyn MessageBus>, tasks: mpsc::Sender<ListeningTask>) -> Self {
        Self { bus, tasks }
    }

    fn to_task(message: &Message) -> Option<ListeningTask> {
        match message {
            Message::StartListeningTask {
                task_id,
                correlation_id,
                topic_id,
                platform,
                created_at,
                query,
            } => Some(ListeningTask {
                id: *task_id,
                correlation_id: *correlation_id,
                topic_id: *topic_id,
                platform: *platform,
                created_at: *created_at,
                updated_at: None,
                status: TaskStatus::Queued,
                query: query.clone(),
            }),
            _ => None,
        }
    }

    /// Consume start commands until shutdown. Dropping `self.tasks` on exit
    /// closes the channel and lets dispatch drain what is already buffered.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Task ingress started");

        let mut consumer = match self
            .bus
            .consumer(CONSUMER_GROUP, &[MessageKind::StartListeningTask])
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Task ingress could not open a bus consumer");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                delivery = consumer.next() => {
                    let delivery = match delivery {
                        Ok(Some(d)) => d,
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "Ingress consumer read failed");
                            continue;
                        }
                    };

                    let Some(task) = Self::to_task(&delivery.message) else {
                        // Subscription is kind-filtered; anything else here
                        // is a bus bug. Ack so it does not wedge the group.
                        warn!(seq = delivery.seq, "Unexpected message kind on ingress");
                        let _ = consumer.ack(delivery.seq).await;
                        continue;
                    };

                    // Receipt first. The tracker applies statuses
                    // idempotently, so a duplicate TaskQueued after
                    // redelivery is harmless.
                    let queued = Message::TaskQueued {
                        task_id: task.id,
                        correlation_id: task.correlation_id,
                        created_at: Utc::now(),
                        query: task.query.clone(),
                    };
                    if let Err(e) = self.bus.publish(&queued).await {
                        warn!(task_id = %task.id, error = %e, "Failed to publish task receipt");
                    }

                    info!(task_id = %task.id, platform = %task.platform, "Accepted listening task");

                    let task_id = task.id;
                    if self.tasks.send(task).await.is_err() {
                        // Dispatch is gone; leave the command unacked.
                        warn!(task_id = %task_id, "Task channel closed, stopping ingress");
                        break;
                    }

                    if let Err(e) = consumer.ack(delivery.seq).await {
                        warn!(task_id = %task_id, error = %e, "Ingress ack failed");
                    }
                }
            }
        }

        info!("Task ingress stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_bus::MemoryBus;
    use murmur_common::Platform;
    use uuid::Uuid;

    fn command(task_id: Uuid, query: &str) -> Message {
        Message::StartListeningTask {
            task_id,
            correlation_id: task_id,
            topic_id: Uuid::new_v4(),
            platform: Platform::Bluesky,
            created_at: Utc::now(),
            query: query.to_string(),
        }
    }

    #[tokio::test]
    async fn commands_become_tasks_with_a_receipt() {
        let bus = Arc::new(MemoryBus::new());
        let (tx, mut rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task_id = Uuid::new_v4();
        bus.publish(&command(task_id, "climate change")).await.unwrap();

        let ingress = TaskIngress::new(bus.clone(), tx);
        let handle = tokio::spawn(ingress.run(shutdown_rx));

        let task = rx.recv().await.expect("task should arrive");
        assert_eq!(task.id, task_id);
        assert_eq!(task.correlation_id, task_id);
        assert_eq!(task.query, "climate change");
        assert_eq!(task.status, TaskStatus::Queued);

        let receipts = bus.published_of_kind(MessageKind::TaskQueued).await;
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].task_id(), Some(task_id));

        let _ = shutdown_tx.send(true);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_closes_the_task_channel() {
        let bus = Arc::new(MemoryBus::new());
        let (tx, mut rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ingress = TaskIngress::new(bus, tx);
        let handle = tokio::spawn(ingress.run(shutdown_rx));

        let _ = shutdown_tx.send(true);
        handle.await.unwrap();

        assert!(rx.recv().await.is_none(), "sender must be dropped");
    }
}
