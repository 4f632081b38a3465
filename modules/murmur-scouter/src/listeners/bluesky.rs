use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use bluesky_client::{BlueskyClient, BlueskyPost};
use murmur_common::{ListeningTask, Platform, SocialPost};

use crate::capability::SearchCapability;

/// Posts fetched per search call. Bluesky allows up to 100; a listening
/// cycle only needs the freshest slice.
const SEARCH_LIMIT: u32 = 25;

pub struct BlueskyListener {
    client: BlueskyClient,
}

impl BlueskyListener {
    pub fn new(client: BlueskyClient) -> Self {
        Self { client }
    }

    fn to_post(post: &BlueskyPost, task: &ListeningTask) -> SocialPost {
        SocialPost {
            id: Uuid::new_v4(),
            // Bluesky posts have no separate title field.
            title: None,
            content: post.record.text.clone(),
            created_at: post
                .record
                .created_at
                .or(post.indexed_at)
                .unwrap_or_else(Utc::now),
            source_url: post.web_url(),
            source_id: post.cid.clone(),
            platform: Platform::Bluesky,
            sentiment: None,
            generated_from_task_id: task.id,
        }
    }
}

#[async_trait]
impl SearchCapability for BlueskyListener {
    fn platform(&self) -> Platform {
        Platform::Bluesky
    }

    async fn search(&self, task: &ListeningTask) -> Result<Vec<SocialPost>> {
        let posts = self.client.search_posts(&task.query, SEARCH_LIMIT).await?;
        Ok(posts.iter().map(|p| Self::to_post(p, task)).collect())
    }
}
