pub mod error;
pub mod types;

pub use error::{BlueskyError, Result};
pub use types::{BlueskyAuthor, BlueskyPost, BlueskyRecord, SearchPostsResponse};

use std::time::Duration;

use tracing::warn;

use murmur_common::RateLimiter;

/// Retry budget per search call. Once this is spent the error surfaces to
/// the caller, which treats it as retry exhaustion.
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

pub struct BlueskyClient {
    client: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
}

impl BlueskyClient {
    pub fn new(base_url: impl Into<String>, limiter: RateLimiter) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            limiter,
        }
    }

    /// Full-text post search via `app.bsky.feed.searchPosts`.
    /// Retries 429/5xx with backoff inside the rate limiter's budget.
    pub async fn search_posts(&self, query: &str, limit: u32) -> Result<Vec<BlueskyPost>> {
        let url = format!("{}/xrpc/app.bsky.feed.searchPosts", self.base_url);

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.limiter.acquire().await;

            let resp = self
                .client
                .get(&url)
                .query(&[("q", query), ("limit", &limit.to_string())])
                .send()
                .await;

            match resp {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let body: SearchPostsResponse = resp.json().await?;
                        return Ok(body.posts);
                    }

                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if !retryable || attempt >= MAX_ATTEMPTS {
                        let message = resp.text().await.unwrap_or_default();
                        return Err(BlueskyError::Api {
                            status: status.as_u16(),
                            message,
                        });
                    }
                    warn!(status = status.as_u16(), attempt, "Bluesky search retrying");
                }
                Err(e) => {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(e.into());
                    }
                    warn!(error = %e, attempt, "Bluesky request failed, retrying");
                }
            }

            tokio::time::sleep(RETRY_BASE_DELAY * attempt).await;
        }
    }
}
