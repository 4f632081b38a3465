pub mod error;
pub mod types;

pub use error::{MastodonError, Result};
pub use types::{MastodonAccount, MastodonStatus, SearchResponse};

use std::time::Duration;

use tracing::warn;

use murmur_common::RateLimiter;

/// Maximum `limit` the Mastodon search API accepts.
pub const MAX_SEARCH_LIMIT: u32 = 40;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

pub struct MastodonClient {
    client: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
}

impl MastodonClient {
    pub fn new(base_url: impl Into<String>, limiter: RateLimiter) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            limiter,
        }
    }

    /// Status search via `/api/v2/search`. `limit` is clamped to the API
    /// maximum. Retries 429/5xx with backoff.
    pub async fn search_statuses(&self, query: &str, limit: u32) -> Result<Vec<MastodonStatus>> {
        let url = format!("{}/api/v2/search", self.base_url);
        let limit = limit.min(MAX_SEARCH_LIMIT);

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.limiter.acquire().await;

            let resp = self
                .client
                .get(&url)
                .query(&[
                    ("q", query),
                    ("type", "statuses"),
                    ("limit", &limit.to_string()),
                ])
                .send()
                .await;

            match resp {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let body: SearchResponse = resp.json().await?;
                        return Ok(body.statuses);
                    }

                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if !retryable || attempt >= MAX_ATTEMPTS {
                        let message = resp.text().await.unwrap_or_default();
                        return Err(MastodonError::Api {
                            status: status.as_u16(),
                            message,
                        });
                    }
                    warn!(status = status.as_u16(), attempt, "Mastodon search retrying");
                }
                Err(e) => {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(e.into());
                    }
                    warn!(error = %e, attempt, "Mastodon request failed, retrying");
                }
            }

            tokio::time::sleep(RETRY_BASE_DELAY * attempt).await;
        }
    }
}
