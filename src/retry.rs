use crate::error::ClientError;
use std::time::Duration;
use tokio::time;
use tracing::debug;

/// Bounded retry with linear backoff: attempt `n` (1-based) that fails transiently waits
/// `base_delay * n` before attempt `n + 1`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub classify: fn(&ClientError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            classify: ClientError::is_transient,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    pub fn with_classifier(mut self, classify: fn(&ClientError) -> bool) -> Self {
        self.classify = classify;
        self
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if !(policy.classify)(&err) => return Err(err),
            Err(err) if attempt >= max_attempts => {
                return Err(ClientError::RetryExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }
            Err(err) => {
                let delay = policy.delay_for_attempt(attempt);
                debug!(attempt, ?delay, %err, "retrying after transient failure");
                time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
