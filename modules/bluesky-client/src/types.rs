use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct SearchPostsResponse {
    pub posts: Vec<BlueskyPost>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// One post as returned by `app.bsky.feed.searchPosts`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlueskyPost {
    /// AT-URI of the post (at://did:plc:.../app.bsky.feed.post/...).
    pub uri: String,
    /// Content hash; stable external id for dedup.
    pub cid: String,
    pub author: BlueskyAuthor,
    pub record: BlueskyRecord,
    #[serde(default)]
    pub indexed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlueskyAuthor {
    pub did: String,
    pub handle: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlueskyRecord {
    pub text: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl BlueskyPost {
    /// Web URL for the post. The AT-URI is canonical but not clickable;
    /// bsky.app resolves handle + rkey.
    pub fn web_url(&self) -> String {
        match self.uri.rsplit('/').next() {
            Some(rkey) if self.uri.contains("app.bsky.feed.post") => {
                format!("https://bsky.app/profile/{}/post/{}", self.author.handle, rkey)
            }
            _ => self.uri.clone(),
        }
    }
}
