//! Constant-interval retry for agent RPCs.

use crate::error::AgentApiError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Fixed interval retry bounded by a total duration, each attempt bounded
/// by its own timeout.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub total: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            total: Duration::from_secs(5 * 60),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Runs `op` until it succeeds, fails with a non-retryable error, the
    /// total budget is spent, or `cancel` fires.
    pub async fn run<T, F, Fut>(&self, name: &str, cancel: &CancellationToken, mut op: F) -> Result<T, AgentApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AgentApiError>>,
    {
        let deadline = Instant::now() + self.total;
        let mut attempts = 0;

        loop {
            attempts += 1;

            let result = tokio::select! {
                () = cancel.cancelled() => return Err(AgentApiError::Cancelled),
                r = tokio::time::timeout(self.attempt_timeout, op()) => r.unwrap_or(Err(AgentApiError::Timeout)),
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if Instant::now() + self.interval > deadline {
                return Err(AgentApiError::RetriesExhausted {
                    attempts,
                    last: Box::new(err),
                });
            }

            warn!(rpc = name, attempt = attempts, error = %err, "RPC failed, retrying");

            tokio::select! {
                () = cancel.cancelled() => return Err(AgentApiError::Cancelled),
                () = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
