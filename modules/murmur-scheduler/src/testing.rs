//! In-memory scheduler store for tests. No network, no database, no Docker.
//!
//! Mirrors the transactional contract of `PgStore`: a batch write either
//! lands completely or not at all, including its outbox rows.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use murmur_common::{ListeningTask, TaskStatus, Topic};
use murmur_contracts::Message;

use crate::outbox::{OutboxRow, OutboxSource};
use crate::store::SchedulerStore;

#[derive(Default)]
struct Inner {
    topics: Vec<Topic>,
    tasks: HashMap<Uuid, ListeningTask>,
    outbox: Vec<(i64, Message, bool)>, // (id, message, sent)
    next_outbox_id: i64,
    fail_next_write: bool,
    fail_next_status_write: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_outbox_id: 1,
                ..Inner::default()
            }),
        }
    }

    /// Arm a one-shot failure: the next `create_tasks_with_outbox` call
    /// errors and leaves no trace, like a rolled-back transaction.
    pub async fn fail_next_write(&self) {
        self.inner.lock().unwrap().fail_next_write = true;
    }

    /// Arm a one-shot failure on the next `set_task_status` call.
    pub async fn fail_next_status_write(&self) {
        self.inner.lock().unwrap().fail_next_status_write = true;
    }

    /// Place a message in the outbox directly, bypassing task creation.
    pub async fn enqueue_for_test(&self, message: Message) {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_outbox_id;
        inner.next_outbox_id += 1;
        inner.outbox.push((id, message, false));
    }

    /// Insert a task row directly, bypassing the arranger.
    pub fn insert_task_for_test(&self, task: ListeningTask) {
        self.inner.lock().unwrap().tasks.insert(task.id, task);
    }

    pub async fn unsent_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .outbox
            .iter()
            .filter(|(_, _, sent)| !sent)
            .count()
    }

    pub async fn task_count(&self) -> usize {
        self.inner.lock().unwrap().tasks.len()
    }

    pub async fn all_tasks(&self) -> Vec<ListeningTask> {
        let mut tasks: Vec<_> = self.inner.lock().unwrap().tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    pub async fn task_status(&self, id: Uuid) -> Option<TaskStatus> {
        self.inner.lock().unwrap().tasks.get(&id).map(|t| t.status)
    }
}

#[async_trait]
impl SchedulerStore for MemoryStore {
    async fn list_topics(&self) -> Result<Vec<Topic>> {
        Ok(self.inner.lock().unwrap().topics.clone())
    }

    async fn insert_topics(&self, topics: &[Topic]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for topic in topics {
            if !inner.topics.iter().any(|t| t.id == topic.id) {
                inner.topics.push(topic.clone());
            }
        }
        Ok(())
    }

    async fn topic_count(&self) -> Result<i64> {
        Ok(self.inner.lock().unwrap().topics.len() as i64)
    }

    async fn create_tasks_with_outbox(
        &self,
        tasks: &[ListeningTask],
        commands: &[Message],
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_next_write {
            inner.fail_next_write = false;
            bail!("simulated write failure");
        }
        for task in tasks {
            inner.tasks.insert(task.id, task.clone());
        }
        for command in commands {
            let id = inner.next_outbox_id;
            inner.next_outbox_id += 1;
            inner.outbox.push((id, command.clone(), false));
        }
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<ListeningTask>> {
        Ok(self.inner.lock().unwrap().tasks.get(&id).cloned())
    }

    async fn set_task_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_next_status_write {
            inner.fail_next_status_write = false;
            bail!("simulated status write failure");
        }
        if let Some(task) = inner.tasks.get_mut(&id) {
            task.status = status;
            task.updated_at = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl OutboxSource for MemoryStore {
    async fn fetch_unsent(&self, limit: i64) -> Result<Vec<OutboxRow>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .outbox
            .iter()
            .filter(|(_, _, sent)| !sent)
            .take(limit as usize)
            .map(|(id, message, _)| OutboxRow {
                id: *id,
                message: message.clone(),
            })
            .collect())
    }

    async fn mark_sent(&self, id: i64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.outbox.iter_mut().find(|(row_id, _, _)| *row_id == id) {
            entry.2 = true;
        }
        Ok(())
    }
}
