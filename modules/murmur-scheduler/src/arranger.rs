//! The task arranger: on every schedule tick, materialize listening tasks
//! from the topic set and hand their start commands to the outbox; one
//! transaction, so task rows and commands can never diverge.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use murmur_common::{ListeningTask, Platform, TaskStatus};
use murmur_contracts::Message;

use crate::store::SchedulerStore;

pub struct TaskArranger {
    store: Arc<dyn SchedulerStore>,
    /// Ordered set of platforms this deployment listens to. A first-class
    /// input, not a compile-time constant.
    platforms: Vec<Platform>,
}

impl TaskArranger {
    pub fn new(store: Arc<dyn SchedulerStore>, platforms: Vec<Platform>) -> Self {
        Self { store, platforms }
    }

    /// Materialize one batch of tasks and enqueue their start commands.
    ///
    /// Every enabled (platform, topic) pairing where the topic is scoped to
    /// that platform yields a fresh task; topic × platform recurs every
    /// cycle by design, there is no cross-run duplicate suppression.
    /// Returns the number of tasks created; zero (empty topic set) is a
    /// logged no-op, not an error.
    pub async fn arrange_and_publish(&self) -> Result<usize> {
        info!("Arranging listening tasks");
        let topics = self.store.list_topics().await?;

        let mut tasks = Vec::new();
        let mut commands = Vec::new();
        let now = Utc::now();

        for platform in &self.platforms {
            for topic in topics.iter().filter(|t| t.platform == *platform) {
                if let Err(e) = topic.validate() {
                    warn!(topic_id = %topic.id, error = %e, "Skipping invalid topic");
                    continue;
                }

                let task_id = Uuid::new_v4();
                let task = ListeningTask {
                    id: task_id,
                    // Single hop at this stage: the task is its own unit of work.
                    correlation_id: task_id,
                    topic_id: topic.id,
                    platform: *platform,
                    created_at: now,
                    updated_at: None,
                    status: TaskStatus::Queued,
                    query: topic.query(),
                };

                commands.push(Message::StartListeningTask {
                    task_id: task.id,
                    correlation_id: task.correlation_id,
                    topic_id: task.topic_id,
                    platform: task.platform,
                    created_at: task.created_at,
                    query: task.query.clone(),
                });
                tasks.push(task);
            }
        }

        if tasks.is_empty() {
            info!("No tasks to arrange, skipping publication");
            return Ok(0);
        }

        self.store
            .create_tasks_with_outbox(&tasks, &commands)
            .await?;

        info!(count = tasks.len(), "Arranged and enqueued listening tasks");
        Ok(tasks.len())
    }
}
