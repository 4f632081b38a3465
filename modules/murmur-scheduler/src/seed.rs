//! Starter topics for a fresh deployment. Only applied when the topic table
//! is empty, so operator-curated topics are never overwritten.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use uuid::Uuid;

use murmur_common::{Platform, Topic};

use crate::store::SchedulerStore;

fn default_topics() -> Vec<Topic> {
    vec![
        Topic {
            id: Uuid::new_v4(),
            keywords: vec!["climate change".to_string(), "global warming".to_string()],
            language: "en".to_string(),
            platform: Platform::Bluesky,
        },
        Topic {
            id: Uuid::new_v4(),
            keywords: vec!["fediverse".to_string()],
            language: "en".to_string(),
            platform: Platform::Mastodon,
        },
    ]
}

/// Insert the default topic set if the store has none. Returns how many
/// topics were inserted.
pub async fn seed_if_empty(store: &Arc<dyn SchedulerStore>) -> Result<usize> {
    if store.topic_count().await? > 0 {
        info!("Topic table already populated, skipping seed");
        return Ok(0);
    }

    let topics = default_topics();
    store.insert_topics(&topics).await?;
    info!(count = topics.len(), "Seeded default topics");
    Ok(topics.len())
}
