//! The task status tracker: folds asynchronous status events into the
//! authoritative task record.
//!
//! Events arrive at-least-once and in no guaranteed order. Application is
//! idempotent (re-applying a status is an overwrite) and monotonic (a
//! terminal status is never downgraded by a late Progressed).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use murmur_bus::MessageBus;
use murmur_common::TaskStatus;
use murmur_contracts::{Message, MessageKind};

use crate::store::SchedulerStore;

/// Consumer group name; one cursor shared by all tracker instances.
const CONSUMER_GROUP: &str = "scheduler-status";

/// Pause between retries of a failed status application.
const APPLY_RETRY_DELAY: Duration = Duration::from_millis(200);

pub struct StatusTracker {
    store: Arc<dyn SchedulerStore>,
}

impl StatusTracker {
    pub fn new(store: Arc<dyn SchedulerStore>) -> Self {
        Self { store }
    }

    /// The status a message maps to, if it is a status event at all.
    fn target_status(message: &Message) -> Option<(Uuid, TaskStatus, DateTime<Utc>)> {
        match message {
            Message::TaskQueued {
                task_id,
                created_at,
                ..
            } => Some((*task_id, TaskStatus::Queued, *created_at)),
            Message::TaskProgressed {
                task_id,
                created_at,
                ..
            } => Some((*task_id, TaskStatus::Processing, *created_at)),
            Message::TaskFinished {
                task_id,
                finished_at,
                ..
            } => Some((*task_id, TaskStatus::Success, *finished_at)),
            Message::TaskFailed {
                task_id, failed_at, ..
            } => Some((*task_id, TaskStatus::Failed, *failed_at)),
            _ => None,
        }
    }

    /// Apply one status event to the task record.
    pub async fn apply(&self, message: &Message) -> Result<()> {
        let Some((task_id, status, event_time)) = Self::target_status(message) else {
            return Ok(());
        };

        let Some(task) = self.store.get_task(task_id).await? else {
            // The task must already exist from the arranger. A status event
            // for an unknown id never creates a phantom row.
            warn!(task_id = %task_id, status = %status, "Status event for unknown task, ignoring");
            return Ok(());
        };

        // Progressed is best-effort telemetry: it must never pull a task
        // back out of a terminal state.
        if task.status.is_terminal() && !status.is_terminal() {
            debug!(
                task_id = %task_id,
                current = %task.status,
                incoming = %status,
                "Ignoring non-terminal event after terminal status"
            );
            return Ok(());
        }

        self.store
            .set_task_status(task_id, status, event_time)
            .await?;
        info!(task_id = %task_id, status = %status, "Task status updated");
        Ok(())
    }

    /// Consume status events from the bus until shutdown.
    pub async fn run(self, bus: Arc<dyn MessageBus>, mut shutdown: watch::Receiver<bool>) {
        info!("Status tracker started");

        let kinds = [
            MessageKind::TaskQueued,
            MessageKind::TaskProgressed,
            MessageKind::TaskFinished,
            MessageKind::TaskFailed,
        ];
        let mut consumer = match bus.consumer(CONSUMER_GROUP, &kinds).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Status tracker could not open a bus consumer");
                return;
            }
        };

        'consume: loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                delivery = consumer.next() => {
                    let delivery = match delivery {
                        Ok(Some(d)) => d,
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "Status consumer read failed");
                            continue;
                        }
                    };

                    // The group cursor only moves forward, so acking a later
                    // delivery would skip this one for good. Retry in place
                    // until the store accepts it; application is idempotent,
                    // so a crash mid-retry just redelivers.
                    loop {
                        match self.apply(&delivery.message).await {
                            Ok(()) => {
                                if let Err(e) = consumer.ack(delivery.seq).await {
                                    warn!(error = %e, seq = delivery.seq, "Status ack failed");
                                }
                                break;
                            }
                            Err(e) => {
                                warn!(
                                    task_id = ?delivery.message.task_id(),
                                    error = %e,
                                    "Failed to apply status event, retrying"
                                );
                                tokio::select! {
                                    _ = shutdown.changed() => break 'consume,
                                    _ = tokio::time::sleep(APPLY_RETRY_DELAY) => {}
                                }
                            }
                        }
                    }
                }
            }
        }

        info!("Status tracker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SchedulerStore;
    use crate::testing::MemoryStore;
    use murmur_common::{ListeningTask, Platform};

    fn seeded_task(store: &MemoryStore) -> ListeningTask {
        let id = Uuid::new_v4();
        let task = ListeningTask {
            id,
            correlation_id: id,
            topic_id: Uuid::new_v4(),
            platform: Platform::Bluesky,
            created_at: Utc::now(),
            updated_at: None,
            status: TaskStatus::Queued,
            query: "q".to_string(),
        };
        store.insert_task_for_test(task.clone());
        task
    }

    fn finished(task_id: Uuid) -> Message {
        Message::TaskFinished {
            task_id,
            correlation_id: task_id,
            finished_at: Utc::now(),
            query: "q".to_string(),
        }
    }

    fn progressed(task_id: Uuid) -> Message {
        Message::TaskProgressed {
            task_id,
            correlation_id: task_id,
            created_at: Utc::now(),
            platform: Platform::Bluesky,
            found_count: 0,
        }
    }

    #[tokio::test]
    async fn normal_progression_reaches_success() {
        let store = Arc::new(MemoryStore::new());
        let task = seeded_task(&store);
        let tracker = StatusTracker::new(store.clone());

        tracker.apply(&progressed(task.id)).await.unwrap();
        assert_eq!(store.task_status(task.id).await, Some(TaskStatus::Processing));

        tracker.apply(&finished(task.id)).await.unwrap();
        assert_eq!(store.task_status(task.id).await, Some(TaskStatus::Success));

        let stored = store.get_task(task.id).await.unwrap().unwrap();
        assert!(stored.updated_at.is_some());
    }

    #[tokio::test]
    async fn late_progressed_never_downgrades_terminal_status() {
        // Finished then Progressed (out of order) leaves Success.
        let store = Arc::new(MemoryStore::new());
        let task = seeded_task(&store);
        let tracker = StatusTracker::new(store.clone());

        tracker.apply(&finished(task.id)).await.unwrap();
        tracker.apply(&progressed(task.id)).await.unwrap();

        assert_eq!(store.task_status(task.id).await, Some(TaskStatus::Success));
    }

    #[tokio::test]
    async fn terminal_status_can_be_absent_of_progressed() {
        // Progressed is optional telemetry; a task may jump straight from
        // Queued to a terminal state.
        let store = Arc::new(MemoryStore::new());
        let task = seeded_task(&store);
        let tracker = StatusTracker::new(store.clone());

        tracker.apply(&finished(task.id)).await.unwrap();
        assert_eq!(store.task_status(task.id).await, Some(TaskStatus::Success));
    }

    #[tokio::test]
    async fn unknown_task_id_is_a_silent_no_op() {
        // No phantom row, no error.
        let store = Arc::new(MemoryStore::new());
        let tracker = StatusTracker::new(store.clone());

        tracker.apply(&finished(Uuid::new_v4())).await.unwrap();
        assert_eq!(store.task_count().await, 0);
    }

    #[tokio::test]
    async fn reapplying_a_terminal_status_is_harmless() {
        let store = Arc::new(MemoryStore::new());
        let task = seeded_task(&store);
        let tracker = StatusTracker::new(store.clone());

        tracker.apply(&finished(task.id)).await.unwrap();
        tracker.apply(&finished(task.id)).await.unwrap();

        assert_eq!(store.task_status(task.id).await, Some(TaskStatus::Success));
    }

    #[tokio::test]
    async fn transient_store_failure_is_retried_in_place() {
        // A failed application must not let the consumer advance: the same
        // event is retried until the store accepts it, and later events are
        // only applied afterwards.
        use murmur_bus::{MemoryBus, MessageBus};
        use tokio::sync::watch;

        let store = Arc::new(MemoryStore::new());
        let first = seeded_task(&store);
        let second = seeded_task(&store);
        store.fail_next_status_write().await;

        let bus = Arc::new(MemoryBus::new());
        bus.publish(&finished(first.id)).await.unwrap();
        bus.publish(&finished(second.id)).await.unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tracker = StatusTracker::new(store.clone());
        let handle = tokio::spawn(tracker.run(bus, shutdown_rx));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let statuses = (
                store.task_status(first.id).await,
                store.task_status(second.id).await,
            );
            if statuses == (Some(TaskStatus::Success), Some(TaskStatus::Success)) {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "events were not applied: {statuses:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let _ = shutdown_tx.send(true);
        let _ = handle.await;
    }

    #[tokio::test]
    async fn non_status_messages_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        let tracker = StatusTracker::new(store.clone());

        let item = Message::ItemCreated {
            info_id: Uuid::new_v4(),
            correlation_id: Uuid::new_v4(),
            created_at: Utc::now(),
            title: None,
            content: "c".to_string(),
            original_url: "https://example.com".to_string(),
            original_id: "1".to_string(),
            platform: Platform::Bluesky,
            generated_from_task_id: Uuid::new_v4(),
        };
        tracker.apply(&item).await.unwrap();
        assert_eq!(store.task_count().await, 0);
    }
}
