use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Response shape of `/api/v2/search` with `type=statuses`.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub statuses: Vec<MastodonStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MastodonStatus {
    pub id: String,
    /// Public web URL. Missing for some remote statuses; `uri` is the
    /// federation fallback.
    #[serde(default)]
    pub url: Option<String>,
    pub uri: String,
    /// HTML body.
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Content warning text; doubles as a title when present.
    #[serde(default)]
    pub spoiler_text: String,
    pub account: MastodonAccount,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MastodonAccount {
    pub id: String,
    pub acct: String,
    #[serde(default)]
    pub display_name: String,
}

impl MastodonStatus {
    pub fn link(&self) -> &str {
        self.url.as_deref().unwrap_or(&self.uri)
    }
}
