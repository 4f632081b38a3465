use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length of a social post's content. Longer content is truncated
/// at construction so every downstream consumer sees the same bound.
pub const MAX_CONTENT_CHARS: usize = 1_000;

/// Maximum length of a social post's optional title.
pub const MAX_TITLE_CHARS: usize = 100;

// --- Platforms ---

/// Social platforms supported for listening. Dispatch routing is keyed on
/// this tag, not on a type hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Bluesky,
    Mastodon,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Bluesky => write!(f, "bluesky"),
            Platform::Mastodon => write!(f, "mastodon"),
        }
    }
}

impl Platform {
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "bluesky" | "bsky" => Some(Self::Bluesky),
            "mastodon" => Some(Self::Mastodon),
            _ => None,
        }
    }

    /// All platforms this build knows how to listen to, in a stable order.
    /// Deployments narrow this via the `ENABLED_PLATFORMS` config value.
    pub fn all() -> Vec<Platform> {
        vec![Platform::Bluesky, Platform::Mastodon]
    }
}

// --- Task status state machine ---

/// Status of a listening task: `Queued → Processing → Success | Failed`.
///
/// Processing is best-effort telemetry; a progressed event may never arrive
/// before the terminal one, and a terminal status is never downgraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Processing,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }

    /// Legacy task rows carry Pending/Processing values from before the
    /// five-state model; anything unrecognized collapses to Queued.
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "processing" => Self::Processing,
            "success" => Self::Success,
            "failed" => Self::Failed,
            _ => Self::Queued,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Processing => write!(f, "processing"),
            TaskStatus::Success => write!(f, "success"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

// --- Topics ---

/// A listening topic: keywords to search for, scoped to a default platform.
/// Read-only from the pipeline's perspective; created and edited elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: Uuid,
    /// Ordered, non-empty. The search query is derived by joining with spaces.
    pub keywords: Vec<String>,
    /// BCP-47 language tag, e.g. "en".
    pub language: String,
    /// The topic's default platform scope. Task.platform is what actually
    /// routes dispatch; the arranger may fan a topic out more widely.
    pub platform: Platform,
}

impl Topic {
    /// Derive the search query by joining keywords with single spaces.
    pub fn query(&self) -> String {
        self.keywords.join(" ")
    }

    pub fn validate(&self) -> Result<(), crate::MurmurError> {
        if self.keywords.is_empty() || self.keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(crate::MurmurError::Validation(format!(
                "topic {} has empty keywords",
                self.id
            )));
        }
        Ok(())
    }
}

// --- Listening tasks ---

/// One scheduled search execution. Created by the arranger with status
/// Queued; mutated only by the status tracker; never deleted by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListeningTask {
    pub id: Uuid,
    /// Propagated end-to-end so one logical unit of work can be traced
    /// across processes. Equal to `id` at arrangement time (single hop).
    pub correlation_id: Uuid,
    pub topic_id: Uuid,
    /// Authoritative for dispatch routing.
    pub platform: Platform,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    /// Derived from the topic's keywords at arrangement time.
    pub query: String,
}

// --- Search result items ---

/// A piece of social information found by a search: one post, toot, etc.
///
/// (platform, source_id) is the downstream dedup key; re-delivery of the
/// same item is a no-op at the sink, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialPost {
    pub id: Uuid,
    pub title: Option<String>,
    pub content: String,
    /// Posted time from the source, or ingestion time if unknown.
    pub created_at: DateTime<Utc>,
    pub source_url: String,
    /// Opaque external id assigned by the platform.
    pub source_id: String,
    pub platform: Platform,
    pub sentiment: Option<f32>,
    /// Weak back-reference; the task may be archived independently.
    pub generated_from_task_id: Uuid,
}

impl SocialPost {
    /// Apply the content/title length bounds in place.
    pub fn clamp(mut self) -> Self {
        self.content = truncate_chars(&self.content, MAX_CONTENT_CHARS);
        self.title = self.title.map(|t| truncate_chars(&t, MAX_TITLE_CHARS));
        self
    }
}

/// Truncate a string to at most `max` characters, on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_query_joins_keywords_with_spaces() {
        let topic = Topic {
            id: Uuid::new_v4(),
            keywords: vec!["climate change".to_string(), "global warming".to_string()],
            language: "en".to_string(),
            platform: Platform::Bluesky,
        };
        assert_eq!(topic.query(), "climate change global warming");
    }

    #[test]
    fn topic_with_empty_keywords_fails_validation() {
        let topic = Topic {
            id: Uuid::new_v4(),
            keywords: vec![],
            language: "en".to_string(),
            platform: Platform::Mastodon,
        };
        assert!(topic.validate().is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Success.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
    }

    #[test]
    fn legacy_status_values_collapse_to_queued() {
        assert_eq!(TaskStatus::from_str_loose("pending"), TaskStatus::Queued);
        assert_eq!(TaskStatus::from_str_loose("Queued"), TaskStatus::Queued);
        assert_eq!(TaskStatus::from_str_loose("success"), TaskStatus::Success);
    }

    #[test]
    fn platform_round_trips_through_display() {
        for p in Platform::all() {
            assert_eq!(Platform::from_str_loose(&p.to_string()), Some(p));
        }
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }

    #[test]
    fn clamp_bounds_content_length() {
        let post = SocialPost {
            id: Uuid::new_v4(),
            title: Some("t".repeat(500)),
            content: "x".repeat(5_000),
            created_at: Utc::now(),
            source_url: "https://example.com/p/1".to_string(),
            source_id: "1".to_string(),
            platform: Platform::Bluesky,
            sentiment: None,
            generated_from_task_id: Uuid::new_v4(),
        }
        .clamp();
        assert_eq!(post.content.chars().count(), MAX_CONTENT_CHARS);
        assert_eq!(post.title.unwrap().chars().count(), MAX_TITLE_CHARS);
    }
}
