use std::env;
use std::time::Duration;

use crate::types::Platform;

/// Application configuration loaded from environment variables.
///
/// Required vars panic with a clear message; tunables have defaults sized
/// for a small deployment.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres (task store and durable bus)
    pub database_url: String,

    // Scheduler
    /// How often the arranger materializes a fresh task batch.
    pub arrange_interval: Duration,
    /// How often the outbox relay scans for unsent messages.
    pub outbox_poll_interval: Duration,
    /// Ordered set of platforms the arranger fans each topic out to.
    pub enabled_platforms: Vec<Platform>,
    /// Seed default topics into an empty topic table at startup.
    pub seed_topics: bool,

    // Scouter
    /// Upper bound on simultaneously in-flight search calls.
    pub dispatch_concurrency: usize,
    /// Unacked delivery credit per bus consumer. Kept below the task
    /// channel capacity so the broker, not process memory, buffers backlog.
    pub bus_prefetch: usize,
    pub task_channel_capacity: usize,
    pub result_channel_capacity: usize,
    /// Per-call timeout on the platform search capability.
    pub search_timeout: Duration,

    // Platform clients
    pub bluesky_base_url: String,
    pub mastodon_base_url: String,
    /// Outbound rate limit: this many requests per window, per platform.
    pub rate_limit_permits: usize,
    pub rate_limit_window: Duration,
}

impl Config {
    pub fn scheduler_from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            arrange_interval: Duration::from_secs(env_or("ARRANGE_INTERVAL_SECS", 900)),
            outbox_poll_interval: Duration::from_secs(env_or("OUTBOX_POLL_INTERVAL_SECS", 5)),
            enabled_platforms: platforms_from_env(),
            seed_topics: env::var("SEED_TOPICS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            ..Self::defaults()
        }
    }

    pub fn scouter_from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            dispatch_concurrency: env_or("DISPATCH_CONCURRENCY", 5),
            bus_prefetch: env_or("BUS_PREFETCH", 48),
            task_channel_capacity: env_or("TASK_CHANNEL_CAPACITY", 64),
            result_channel_capacity: env_or("RESULT_CHANNEL_CAPACITY", 256),
            search_timeout: Duration::from_secs(env_or("SEARCH_TIMEOUT_SECS", 30)),
            bluesky_base_url: env::var("BLUESKY_BASE_URL")
                .unwrap_or_else(|_| "https://public.api.bsky.app".to_string()),
            mastodon_base_url: env::var("MASTODON_BASE_URL")
                .unwrap_or_else(|_| "https://mastodon.social".to_string()),
            rate_limit_permits: env_or("RATE_LIMIT_PERMITS", 30),
            rate_limit_window: Duration::from_secs(env_or("RATE_LIMIT_WINDOW_SECS", 60)),
            ..Self::defaults()
        }
    }

    fn defaults() -> Self {
        Self {
            database_url: String::new(),
            arrange_interval: Duration::from_secs(900),
            outbox_poll_interval: Duration::from_secs(5),
            enabled_platforms: Platform::all(),
            seed_topics: false,
            dispatch_concurrency: 5,
            bus_prefetch: 48,
            task_channel_capacity: 64,
            result_channel_capacity: 256,
            search_timeout: Duration::from_secs(30),
            bluesky_base_url: "https://public.api.bsky.app".to_string(),
            mastodon_base_url: "https://mastodon.social".to_string(),
            rate_limit_permits: 30,
            rate_limit_window: Duration::from_secs(60),
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a valid number")),
        Err(_) => default,
    }
}

/// Parse `ENABLED_PLATFORMS` (comma-separated tags) or fall back to all.
/// Unknown tags are skipped with a warning rather than aborting startup.
fn platforms_from_env() -> Vec<Platform> {
    match env::var("ENABLED_PLATFORMS") {
        Ok(raw) => {
            let mut platforms = Vec::new();
            for tag in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                match Platform::from_str_loose(tag) {
                    Some(p) if !platforms.contains(&p) => platforms.push(p),
                    Some(_) => {}
                    None => tracing::warn!(tag, "Unknown platform tag in ENABLED_PLATFORMS"),
                }
            }
            if platforms.is_empty() {
                Platform::all()
            } else {
                platforms
            }
        }
        Err(_) => Platform::all(),
    }
}
