//! # Retry Driver
//!
//! Repeat a fallible async operation until it succeeds, fails with a
//! non-transient error, or the caller cancels by dropping the future.

use std::ops::AsyncFnMut;
use std::time::Duration;

use tracing::debug;

/// Classification seam between the retry loop and protocol-specific errors.
///
/// Callers map their backend's failure shapes into this single capability;
/// the driver never inspects an error beyond it.
pub trait Transient {
    /// Returns true when the failure is expected to heal on its own.
    fn is_transient(&self) -> bool;
}

/// Exponential backoff schedule with a hard cap.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff {
            base: Duration::from_millis(10),
            max: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl Backoff {
    /// Returns the delay to apply before retrying `attempt` (0-based).
    ///
    /// The schedule is monotonically non-decreasing and saturates at `max`,
    /// so a long outage settles into steady paced probing.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(31) as i32);
        self.base.mul_f64(factor).min(self.max)
    }
}

/// Retry policy for one logical operation.
///
/// `max_attempts < 0` means unlimited attempts; the caller bounds the loop
/// with its own deadline (`tokio::time::timeout`) instead of a count.
#[derive(Debug, Clone, Copy)]
pub struct Retry {
    /// Total attempts allowed; negative for unlimited.
    pub max_attempts: i64,
    /// Delay schedule between attempts.
    pub backoff: Backoff,
}

impl Default for Retry {
    fn default() -> Self {
        Retry {
            max_attempts: -1,
            backoff: Backoff::default(),
        }
    }
}

impl Retry {
    /// Runs `op` until it succeeds or fails for good.
    ///
    /// A transient error is absorbed, waited out, and retried; any other
    /// error propagates unchanged from the attempt that produced it. The
    /// sleep between attempts is a cancellation point, so dropping the
    /// returned future abandons the operation without further attempts.
    pub async fn run<T, E, F>(&self, mut op: F) -> Result<T, E>
    where
        E: Transient,
        F: AsyncFnMut() -> Result<T, E>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) => {
                    if self.max_attempts >= 0 && i64::from(attempt) + 1 >= self.max_attempts {
                        return Err(err);
                    }
                    let delay = self.backoff.delay(attempt);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}
