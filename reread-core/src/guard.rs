//! Retry wrapper for store transactions.
//!
//! Several independent processes share one WAL-mode SQLite file. A writer
//! that loses the race for the write lock gets `SQLITE_BUSY`/`SQLITE_LOCKED`;
//! the whole transaction is rolled back and rerun after a jittered delay.

use std::time::Duration;

use tracing::warn;

use crate::error::{CacheError, Result};

/// Bounded, jittered backoff for busy/locked store errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    /// Total attempts including the first one.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(20),
            max_attempts: 8,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after failed attempt `attempt` (0-based), with
    /// `jitter` in `[0, 1)`:
    /// `base * (1 + jitter) * min(attempt + 1, 5)`.
    pub fn delay(&self, attempt: u32, jitter: f64) -> Duration {
        let factor = (1.0 + jitter.clamp(0.0, 1.0)) * f64::from(attempt.saturating_add(1).min(5));
        let nanos = self.base.as_nanos() as f64 * factor;
        Duration::from_nanos(nanos.round() as u64)
    }
}

/// Runs `op` until it succeeds, fails with a non-busy error, or the attempt
/// budget is spent.
///
/// `op` must be a complete transaction: everything it wrote is rolled back
/// when it returns an error, so rerunning it is always safe.
///
/// # Errors
///
/// Returns the first non-busy error unchanged, or `CacheError::StoreBusy`
/// once `policy.max_attempts` attempts have all hit lock contention.
pub fn with_retry<T>(policy: &RetryPolicy, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_busy() => {
                if attempt + 1 >= max_attempts {
                    return Err(CacheError::StoreBusy {
                        attempts: attempt + 1,
                    });
                }
                let delay = policy.delay(attempt, rand::random::<f64>());
                warn!(attempt = attempt + 1, ?delay, "store busy, retrying");
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
