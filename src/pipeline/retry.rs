use crate::error::{PipelineError, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Exponential backoff for collaborator calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, after `attempt` failures.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Runs `op` until it succeeds, attempts run out, or `cancel` fires.
    ///
    /// Exhaustion turns the last error into
    /// [`PipelineError::CollaboratorUnavailable`].
    pub async fn run<T, F, Fut>(
        &self,
        stage: &'static str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                r = op() => r,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if attempt >= max_attempts {
                tracing::error!(stage, attempt, error = %format!("{err:#}"), "Giving up");
                return Err(PipelineError::CollaboratorUnavailable {
                    stage,
                    attempts: attempt,
                    message: format!("{err:#}"),
                });
            }

            let delay = self.delay(attempt);
            tracing::warn!(
                stage,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %format!("{err:#}"),
                "Collaborator call failed, retrying"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
