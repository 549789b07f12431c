use std::time::Duration;
use tokio::time::sleep;

/// Bounded fixed-delay retry, applied uniformly to transport requests and
/// image loads. `max_attempts` counts the first try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Runs `op` until it succeeds or the attempts are spent, sleeping the
    /// fixed delay between attempts. The final attempt's error is returned
    /// as-is.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.max_attempts.max(1);
        for attempt in 1..attempts {
            if let Ok(value) = op(attempt).await {
                return Ok(value);
            }
            sleep(self.delay).await;
        }
        op(attempts).await
    }
}
