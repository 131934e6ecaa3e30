use std::future::Future;
use std::time::Duration;

/// Bounded exponential-backoff retries around a fallible async operation.
///
/// The delay before retry `n` is `base_delay * 2^n`, optionally capped. The
/// policy retries every error; classifying errors is the caller's concern.
///
/// Composition note: when combined with a [`crate::CircuitBreaker`], the
/// breaker wraps the retry loop (`breaker.call(|| retry.run(op))`), so the
/// breaker state is checked once per logical call and one exhausted retry
/// budget counts as one breaker failure. The inverse nesting would mask an
/// open breaker as a slow retry loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    attempts: u32,
    base_delay: Duration,
    max_delay: Option<Duration>,
}

impl RetryPolicy {
    /// `attempts` is the total number of tries, including the first.
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
            max_delay: None,
        }
    }

    /// Caps the backoff delay.
    pub fn with_max_delay(mut self, cap: Duration) -> Self {
        self.max_delay = Some(cap);
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Runs `op`, retrying on failure until the attempt budget is exhausted.
    /// The final failure propagates unmodified.
    pub async fn run<F, Fut, T, E>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 < self.attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}
