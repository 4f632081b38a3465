use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

/// Windowed rate limiter for outbound platform API calls.
///
/// Holds `permits` in a semaphore; each acquired permit is returned after
/// `window` elapses, so at most `permits` calls start within any window.
/// Callers queue on the semaphore when the window is exhausted.
#[derive(Clone)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    window: Duration,
}

impl RateLimiter {
    pub fn new(permits: usize, window: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            window,
        }
    }

    /// Wait for a slot in the current window. The slot is released back to
    /// the pool `window` after acquisition, regardless of call outcome.
    pub async fn acquire(&self) {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("rate limiter semaphore closed");

        let window = self.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            drop(permit);
        });
    }
}
