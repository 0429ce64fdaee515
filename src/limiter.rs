//! Fixed-interval rate limiter.
//!
//! Enforces a minimum delay between successive operations regardless of how
//! long each operation itself takes. Callers block on [`acquire`] before each
//! sub-resource fetch, bounding request rate even across retries. Bursty
//! parallel fetches are a strong anti-bot signal, so the engine deliberately
//! spaces everything out.
//!
//! [`acquire`]: FixedIntervalLimiter::acquire

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct FixedIntervalLimiter {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl FixedIntervalLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Block until at least `interval` has elapsed since the previous
    /// acquisition. The first acquisition never waits. Concurrent callers
    /// serialize on the internal lock, so spacing holds across tasks too.
    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}
