//! Result sink: the single reader of the result channel. Turns each found
//! post into an `ItemCreated` event for downstream persistence.
//!
//! Losing an item to a publish failure is accepted here: durability is
//! anchored at the outbox, and a lost item resurfaces the next time its
//! task recurs. Duplicates are the downstream's job via (platform,
//! original_id).

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use murmur_bus::MessageBus;
use murmur_common::{truncate_chars, SocialPost};
use murmur_contracts::Message;

pub struct ResultSink {
    bus: Arc<dyn MessageBus>,
}

impl ResultSink {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }

    fn to_event(post: &SocialPost) -> Message {
        Message::ItemCreated {
            info_id: Uuid::new_v4(),
            correlation_id: post.generated_from_task_id,
            created_at: Utc::now(),
            title: post.title.clone(),
            content: post.content.clone(),
            original_url: post.source_url.clone(),
            original_id: post.source_id.clone(),
            platform: post.platform,
            generated_from_task_id: post.generated_from_task_id,
        }
    }

    /// Drain the result channel until every producer has dropped its sender.
    pub async fn run(self, mut results: mpsc::Receiver<SocialPost>) {
        info!("Result sink started");

        while let Some(post) = results.recv().await {
            debug!(
                platform = %post.platform,
                source_id = %post.source_id,
                preview = %truncate_chars(&post.content, 80),
                "Sinking found item"
            );

            let event = Self::to_event(&post);
            if let Err(e) = self.bus.publish(&event).await {
                warn!(
                    platform = %post.platform,
                    source_id = %post.source_id,
                    error = %e,
                    "Failed to publish item, dropping"
                );
            }
        }

        info!("Result sink stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_bus::MemoryBus;
    use murmur_common::Platform;

    fn post(source_id: &str) -> SocialPost {
        SocialPost {
            id: Uuid::new_v4(),
            title: Some("cw".to_string()),
            content: "found something".to_string(),
            created_at: Utc::now(),
            source_url: "https://example.com/p/1".to_string(),
            source_id: source_id.to_string(),
            platform: Platform::Mastodon,
            sentiment: None,
            generated_from_task_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn items_become_item_created_events() {
        let bus = Arc::new(MemoryBus::new());
        let (tx, rx) = mpsc::channel(8);

        let p = post("42");
        let task_id = p.generated_from_task_id;
        tx.send(p).await.unwrap();
        drop(tx);

        ResultSink::new(bus.clone()).run(rx).await;

        let events = bus.published().await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            Message::ItemCreated {
                original_id,
                platform,
                correlation_id,
                generated_from_task_id,
                ..
            } => {
                assert_eq!(original_id, "42");
                assert_eq!(*platform, Platform::Mastodon);
                assert_eq!(*correlation_id, task_id);
                assert_eq!(*generated_from_task_id, task_id);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_failure_drops_the_item_and_continues() {
        let bus = Arc::new(MemoryBus::new());
        bus.close().await; // publish now fails
        let (tx, rx) = mpsc::channel(8);

        tx.send(post("1")).await.unwrap();
        tx.send(post("2")).await.unwrap();
        drop(tx);

        // Must drain both without panicking.
        ResultSink::new(bus.clone()).run(rx).await;
    }
}
