//! Scheduler persistence: topics, listening tasks, and the outbox rows that
//! must commit with them.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use murmur_common::{ListeningTask, Platform, TaskStatus, Topic};
use murmur_contracts::Message;

use crate::outbox::{OutboxRow, OutboxSource};

/// Storage seam for the scheduler. The pipeline tests run against the
/// in-memory implementation in `testing`; deployments use `PgStore`.
#[async_trait]
pub trait SchedulerStore: Send + Sync {
    async fn list_topics(&self) -> Result<Vec<Topic>>;

    async fn insert_topics(&self, topics: &[Topic]) -> Result<()>;

    async fn topic_count(&self) -> Result<i64>;

    /// Persist a batch of fresh tasks and enqueue their outbox messages in
    /// one local transaction. Either every row commits or none do; a task
    /// row without its start command (or vice versa) must be impossible.
    async fn create_tasks_with_outbox(
        &self,
        tasks: &[ListeningTask],
        commands: &[Message],
    ) -> Result<()>;

    async fn get_task(&self, id: Uuid) -> Result<Option<ListeningTask>>;

    async fn set_task_status(&self, id: Uuid, status: TaskStatus, at: DateTime<Utc>)
        -> Result<()>;
}

// ---------------------------------------------------------------------------
// PgStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Idempotent schema setup for the scheduler's tables.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS topics (
            id UUID PRIMARY KEY,
            keywords TEXT[] NOT NULL,
            language TEXT NOT NULL,
            platform TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS listening_tasks (
            id UUID PRIMARY KEY,
            correlation_id UUID NOT NULL,
            topic_id UUID NOT NULL,
            platform TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ,
            status TEXT NOT NULL,
            query TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS outbox_messages (
            id BIGSERIAL PRIMARY KEY,
            kind TEXT NOT NULL,
            payload JSONB NOT NULL,
            enqueued_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            sent_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[async_trait]
impl SchedulerStore for PgStore {
    async fn list_topics(&self) -> Result<Vec<Topic>> {
        let rows = sqlx::query_as::<_, (Uuid, Vec<String>, String, String)>(
            "SELECT id, keywords, language, platform FROM topics ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut topics = Vec::with_capacity(rows.len());
        for (id, keywords, language, platform) in rows {
            let platform = Platform::from_str_loose(&platform)
                .ok_or_else(|| anyhow::anyhow!("topic {id} has unknown platform {platform}"))?;
            topics.push(Topic {
                id,
                keywords,
                language,
                platform,
            });
        }
        Ok(topics)
    }

    async fn insert_topics(&self, topics: &[Topic]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for topic in topics {
            sqlx::query(
                r#"
                INSERT INTO topics (id, keywords, language, platform)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(topic.id)
            .bind(&topic.keywords)
            .bind(&topic.language)
            .bind(topic.platform.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn topic_count(&self) -> Result<i64> {
        let row = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM topics")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    async fn create_tasks_with_outbox(
        &self,
        tasks: &[ListeningTask],
        commands: &[Message],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for task in tasks {
            sqlx::query(
                r#"
                INSERT INTO listening_tasks
                    (id, correlation_id, topic_id, platform, created_at, updated_at, status, query)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(task.id)
            .bind(task.correlation_id)
            .bind(task.topic_id)
            .bind(task.platform.to_string())
            .bind(task.created_at)
            .bind(task.updated_at)
            .bind(task.status.to_string())
            .bind(&task.query)
            .execute(&mut *tx)
            .await?;
        }

        for command in commands {
            crate::outbox::enqueue_message(&mut tx, command).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<ListeningTask>> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, correlation_id, topic_id, platform, created_at, updated_at, status, query
            FROM listening_tasks
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ListeningTask::try_from).transpose()
    }

    async fn set_task_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE listening_tasks SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(status.to_string())
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OutboxSource for PgStore {
    async fn fetch_unsent(&self, limit: i64) -> Result<Vec<OutboxRow>> {
        let rows = sqlx::query_as::<_, (i64, serde_json::Value)>(
            r#"
            SELECT id, payload
            FROM outbox_messages
            WHERE sent_at IS NULL
            ORDER BY id ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for (id, payload) in rows {
            let message: Message = serde_json::from_value(payload)?;
            out.push(OutboxRow { id, message });
        }
        Ok(out)
    }

    async fn mark_sent(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE outbox_messages SET sent_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

struct TaskRow {
    id: Uuid,
    correlation_id: Uuid,
    topic_id: Uuid,
    platform: String,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    status: String,
    query: String,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for TaskRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> std::result::Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(TaskRow {
            id: row.try_get("id")?,
            correlation_id: row.try_get("correlation_id")?,
            topic_id: row.try_get("topic_id")?,
            platform: row.try_get("platform")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            status: row.try_get("status")?,
            query: row.try_get("query")?,
        })
    }
}

impl TryFrom<TaskRow> for ListeningTask {
    type Error = anyhow::Error;

    // Rows written by this service always carry a known platform tag; an
    // unknown one can only come from a newer build and surfaces as an
    // error, matching the topic read path.
    fn try_from(row: TaskRow) -> Result<Self> {
        let platform = Platform::from_str_loose(&row.platform).ok_or_else(|| {
            anyhow::anyhow!("task {} has unknown platform {}", row.id, row.platform)
        })?;

        Ok(ListeningTask {
            id: row.id,
            correlation_id: row.correlation_id,
            topic_id: row.topic_id,
            platform,
            created_at: row.created_at,
            updated_at: row.updated_at,
            status: TaskStatus::from_str_loose(&row.status),
            query: row.query,
        })
    }
}
