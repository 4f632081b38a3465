//! Dispatch: drains the task channel into platform search calls with a
//! fixed concurrency bound.
//!
//! Buffering and execution are decoupled on purpose: the bus prefetch
//! decides how much is in memory, `concurrency` decides how many search
//! calls are actually in flight. One bad task never takes the loop down.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

use murmur_bus::MessageBus;
use murmur_common::{ListeningTask, SocialPost};
use murmur_contracts::Message;

use crate::capability::CapabilityRegistry;

pub struct DispatchPipeline {
    registry: Arc<CapabilityRegistry>,
    bus: Arc<dyn MessageBus>,
    results: mpsc::Sender<SocialPost>,
    concurrency: usize,
    search_timeout: Duration,
}

impl DispatchPipeline {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        bus: Arc<dyn MessageBus>,
        results: mpsc::Sender<SocialPost>,
        concurrency: usize,
        search_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            bus,
            results,
            // A zero limit would panic in for_each_concurrent.
            concurrency: concurrency.max(1),
            search_timeout,
        }
    }

    /// Run until the task channel closes and every in-flight call finishes.
    /// Dropping `self.results` afterwards lets the sink drain and exit.
    pub async fn run(self, tasks: mpsc::Receiver<ListeningTask>) {
        info!(concurrency = self.concurrency, "Dispatch pipeline started");

        let stream = futures::stream::unfold(tasks, |mut rx| async move {
            rx.recv().await.map(|task| (task, rx))
        });

        stream
            .for_each_concurrent(self.concurrency, |task| self.execute(task))
            .await;

        info!("Dispatch pipeline stopped");
    }

    async fn execute(&self, task: ListeningTask) {
        let Some(capability) = self.registry.get(task.platform) else {
            // A configuration gap, not a fault. The task stays Queued and
            // is dropped here; other platforms are unaffected.
            warn!(task_id = %task.id, platform = %task.platform, "No capability for platform, skipping task");
            return;
        };

        let outcome = tokio::time::timeout(self.search_timeout, capability.search(&task)).await;

        let posts = match outcome {
            Ok(Ok(posts)) => posts,
            Ok(Err(e)) => {
                warn!(task_id = %task.id, platform = %task.platform, error = %e, "Search failed");
                self.publish_failed(&task).await;
                return;
            }
            Err(_) => {
                warn!(
                    task_id = %task.id,
                    platform = %task.platform,
                    timeout_secs = self.search_timeout.as_secs(),
                    "Search timed out"
                );
                self.publish_failed(&task).await;
                return;
            }
        };

        let found_count = posts.len() as u32;
        for post in posts {
            let mut post = post.clamp();
            post.generated_from_task_id = task.id;
            if self.results.send(post).await.is_err() {
                warn!(task_id = %task.id, "Result channel closed, dropping remaining items");
                break;
            }
        }

        self.publish(&Message::TaskProgressed {
            task_id: task.id,
            correlation_id: task.correlation_id,
            created_at: Utc::now(),
            platform: task.platform,
            found_count,
        })
        .await;

        self.publish(&Message::TaskFinished {
            task_id: task.id,
            correlation_id: task.correlation_id,
            finished_at: Utc::now(),
            query: task.query.clone(),
        })
        .await;

        info!(task_id = %task.id, found_count, "Listening task finished");
    }

    async fn publish_failed(&self, task: &ListeningTask) {
        self.publish(&Message::TaskFailed {
            task_id: task.id,
            correlation_id: task.correlation_id,
            failed_at: Utc::now(),
            query: task.query.clone(),
        })
        .await;
    }

    /// Status events are fire-and-forget from dispatch's point of view; a
    /// failed publish costs telemetry, never the worker loop.
    async fn publish(&self, message: &Message) {
        if let Err(e) = self.bus.publish(message).await {
            warn!(task_id = ?message.task_id(), error = %e, "Failed to publish status event");
        }
    }
}
