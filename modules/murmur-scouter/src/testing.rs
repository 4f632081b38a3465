//! Instrumented fake capability for pipeline tests. No network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use murmur_common::{ListeningTask, Platform, SocialPost};

use crate::capability::SearchCapability;

/// A scripted search capability. Results are deterministic per query, so a
/// redelivered task reproduces the same (platform, source_id) pairs.
pub struct FakeCapability {
    platform: Platform,
    found_per_call: usize,
    fail: bool,
    delay: Duration,
    in_flight: AtomicUsize,
    high_water: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl FakeCapability {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            found_per_call: 0,
            fail: false,
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Return this many posts from every search call.
    pub fn with_found(mut self, count: usize) -> Self {
        self.found_per_call = count;
        self
    }

    /// Every search call fails.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Hold each search call open for this long, to make overlap observable.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Highest number of simultaneously in-flight search calls observed.
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }

    /// Queries seen, in call order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchCapability for FakeCapability {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn search(&self, task: &ListeningTask) -> Result<Vec<SocialPost>> {
        self.queries.lock().unwrap().push(task.query.clone());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(current, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            bail!("scripted search failure for {}", self.platform);
        }

        Ok((0..self.found_per_call)
            .map(|i| SocialPost {
                id: Uuid::new_v4(),
                title: None,
                content: format!("post {i} for {}", task.query),
                created_at: Utc::now(),
                source_url: format!("https://example.com/{}/{i}", self.platform),
                source_id: format!("{}#{i}", task.query),
                platform: self.platform,
                sentiment: None,
                generated_from_task_id: task.id,
            })
            .collect())
    }
}
