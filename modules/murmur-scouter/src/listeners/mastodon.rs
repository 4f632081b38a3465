use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use uuid::Uuid;

use mastodon_client::{MastodonClient, MastodonStatus, MAX_SEARCH_LIMIT};
use murmur_common::{ListeningTask, Platform, SocialPost};

use crate::capability::SearchCapability;

pub struct MastodonListener {
    client: MastodonClient,
}

impl MastodonListener {
    pub fn new(client: MastodonClient) -> Self {
        Self { client }
    }

    fn to_post(status: &MastodonStatus, task: &ListeningTask) -> SocialPost {
        let title = if status.spoiler_text.trim().is_empty() {
            None
        } else {
            Some(status.spoiler_text.trim().to_string())
        };

        SocialPost {
            id: Uuid::new_v4(),
            title,
            content: strip_html(&status.content),
            created_at: status.created_at,
            source_url: status.link().to_string(),
            source_id: status.id.clone(),
            platform: Platform::Mastodon,
            sentiment: None,
            generated_from_task_id: task.id,
        }
    }
}

#[async_trait]
impl SearchCapability for MastodonListener {
    fn platform(&self) -> Platform {
        Platform::Mastodon
    }

    async fn search(&self, task: &ListeningTask) -> Result<Vec<SocialPost>> {
        let statuses = self
            .client
            .search_statuses(&task.query, MAX_SEARCH_LIMIT)
            .await?;
        Ok(statuses.iter().map(|s| Self::to_post(s, task)).collect())
    }
}

/// Reduce Mastodon's HTML status body to plain text: block boundaries become
/// newlines, remaining tags are stripped, basic entities are decoded.
pub fn strip_html(html: &str) -> String {
    let br = Regex::new(r"(?i)<br\s*/?>").unwrap();
    let p_close = Regex::new(r"(?i)</p>").unwrap();
    let tag = Regex::new(r"<[^>]+>").unwrap();

    let text = br.replace_all(html, "\n");
    let text = p_close.replace_all(&text, "\n\n");
    let text = tag.replace_all(&text, "");

    let text = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ");

    // Collapse runs of blank lines and trailing space left by tag removal.
    let collapsed = Regex::new(r"\n{3,}").unwrap().replace_all(&text, "\n\n");
    collapsed
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
