//! Wire contracts shared across the scheduler/scouter boundary.
//!
//! One internally-tagged enum covers every message that crosses the broker:
//! the start command, the four task status events, and the item event.
//! The `type` tag doubles as the bus `kind` column.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use murmur_common::Platform;

/// Everything that travels over the message bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Command: start executing one listening task. Produced by the
    /// scheduler's outbox, consumed by the scouter ingress.
    StartListeningTask {
        task_id: Uuid,
        correlation_id: Uuid,
        topic_id: Uuid,
        platform: Platform,
        created_at: DateTime<Utc>,
        query: String,
    },

    /// Status: the scouter accepted the task into its work queue.
    TaskQueued {
        task_id: Uuid,
        correlation_id: Uuid,
        created_at: DateTime<Utc>,
        query: String,
    },

    /// Status: the search call ran. `found_count` of 0 means "ran, found
    /// nothing", which still counts as progress.
    TaskProgressed {
        task_id: Uuid,
        correlation_id: Uuid,
        created_at: DateTime<Utc>,
        platform: Platform,
        found_count: u32,
    },

    /// Status: terminal success.
    TaskFinished {
        task_id: Uuid,
        correlation_id: Uuid,
        finished_at: DateTime<Utc>,
        query: String,
    },

    /// Status: terminal failure (search retries exhausted).
    TaskFailed {
        task_id: Uuid,
        correlation_id: Uuid,
        failed_at: DateTime<Utc>,
        query: String,
    },

    /// A search result item, bound for downstream persistence.
    /// (platform, original_id) is the downstream dedup key.
    ItemCreated {
        info_id: Uuid,
        correlation_id: Uuid,
        created_at: DateTime<Utc>,
        title: Option<String>,
        content: String,
        original_url: String,
        original_id: String,
        platform: Platform,
        generated_from_task_id: Uuid,
    },
}

/// Discriminant used for bus subscriptions and the outbox `kind` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    StartListeningTask,
    TaskQueued,
    TaskProgressed,
    TaskFinished,
    TaskFailed,
    ItemCreated,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::StartListeningTask => write!(f, "start_listening_task"),
            MessageKind::TaskQueued => write!(f, "task_queued"),
            MessageKind::TaskProgressed => write!(f, "task_progressed"),
            MessageKind::TaskFinished => write!(f, "task_finished"),
            MessageKind::TaskFailed => write!(f, "task_failed"),
            MessageKind::ItemCreated => write!(f, "item_created"),
        }
    }
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::StartListeningTask { .. } => MessageKind::StartListeningTask,
            Message::TaskQueued { .. } => MessageKind::TaskQueued,
            Message::TaskProgressed { .. } => MessageKind::TaskProgressed,
            Message::TaskFinished { .. } => MessageKind::TaskFinished,
            Message::TaskFailed { .. } => MessageKind::TaskFailed,
            Message::ItemCreated { .. } => MessageKind::ItemCreated,
        }
    }

    /// Task id for task-scoped messages; None for item events.
    pub fn task_id(&self) -> Option<Uuid> {
        match self {
            Message::StartListeningTask { task_id, .. }
            | Message::TaskQueued { task_id, .. }
            | Message::TaskProgressed { task_id, .. }
            | Message::TaskFinished { task_id, .. }
            | Message::TaskFailed { task_id, .. } => Some(*task_id),
            Message::ItemCreated { .. } => None,
        }
    }

    pub fn correlation_id(&self) -> Uuid {
        match self {
            Message::StartListeningTask { correlation_id, .. }
            | Message::TaskQueued { correlation_id, .. }
            | Message::TaskProgressed { correlation_id, .. }
            | Message::TaskFinished { correlation_id, .. }
            | Message::TaskFailed { correlation_id, .. }
            | Message::ItemCreated { correlation_id, .. } => *correlation_id,
        }
    }
}
