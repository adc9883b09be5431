use super::client::HttpClient;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Spaces requests evenly so that all callers sharing this client stay under
/// a calls-per-minute budget. Requests that would exceed it wait for their
/// slot instead of being sent and answered with 429.
pub struct RateLimited<C> {
    inner: C,
    period: Duration,
    next_slot: Mutex<Instant>,
}

impl<C> RateLimited<C> {
    pub fn per_minute(inner: C, calls: u32) -> Self {
        Self {
            inner,
            period: Duration::from_secs(60) / calls.max(1),
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Waits until this caller's slot comes up.
    async fn acquire(&self) {
        let slot = {
            let mut next = self.next_slot.lock().unwrap_or_else(|e| e.into_inner());
            let slot = (*next).max(Instant::now());
            *next = slot + self.period;
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for RateLimited<C> {
    async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        self.acquire().await;
        self.inner.execute(req).await
    }
}
