//! Bounded retry policy shared by every external call.
//!
//! Only errors for which [`ProvisionError::is_transient`] holds are retried;
//! auth, validation and conflict errors return immediately. Nothing retries
//! forever.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::ProvisionError;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    /// Delay multiplier between attempts; 1.0 gives a fixed delay.
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Randomize each delay to 50 to 100% of its nominal value.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Fixed delay between attempts, no jitter.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
            jitter: false,
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Nominal delay before attempt `attempt + 1` (0-based), without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt as i32);
        let nominal = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(nominal.min(self.max_delay.as_secs_f64()))
    }

    fn jittered(&self, d: Duration) -> Duration {
        if !self.jitter || d.is_zero() {
            return d;
        }
        let scale = rand::thread_rng().gen_range(0.5..=1.0);
        d.mul_f64(scale)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Sleep between attempts. Public so polling loops that judge success
    /// themselves can share the same spacing.
    pub async fn pause(&self, attempt: u32) {
        let d = self.jittered(self.delay_for(attempt));
        if !d.is_zero() {
            tokio::time::sleep(d).await;
        }
    }

    /// Run `op` until it succeeds, fails non-transiently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ProvisionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProvisionError>>,
    {
        let attempts = self.attempts();
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => {
                    if attempt > 0 {
                        tracing::info!(op = what, attempt = attempt + 1, "Recovered after retry");
                    }
                    return Ok(v);
                }
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    tracing::warn!(
                        op = what,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    self.pause(attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
