//! Bounded retry with exponential backoff.
//!
//! Applies only to transport-level failures against the controlplane and
//! worker endpoints; everything else in the pipeline either falls back
//! (cache, rate limiter) or is best-effort (audit, events).

use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy: capped exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    /// The transport default: 3 attempts, 100 ms initial, doubling, 2 s cap.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Execute `f`, retrying on `Err` until the attempt budget is spent.
    /// Returns the last error when all attempts fail.
    pub async fn retry<F, Fut, T, E>(&self, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut last_err = None;

        for attempt in 0..self.max_attempts {
            match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempt = attempt + 1, "retry: succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    warn!(
                        attempt = attempt + 1,
                        max = self.max_attempts,
                        error = %e,
                        "retry: attempt failed"
                    );
                    last_err = Some(e);
                    if attempt + 1 < self.max_attempts {
                        tokio::time::sleep(self.delay_for(attempt)).await;
                    }
                }
            }
        }

        // max_attempts >= 1 always stores an error before reaching here.
        Err(last_err.expect("retry loop ran at least once"))
    }

    /// Backoff before the attempt after `attempt` (0-based), jittered ±10%.
    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);
        let jittered = capped * rand::thread_rng().gen_range(0.9..=1.1);
        Duration::from_millis(jittered as u64)
    }
}
