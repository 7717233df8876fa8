//! Minimum-interval throttle for outbound API calls

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spaces calls at least `interval` apart across all tasks sharing it
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl Throttle {
    /// Create a throttle with the given minimum spacing
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_call: Mutex::const_new(None),
        }
    }

    /// Wait until the next call is allowed, then claim the slot
    pub async fn wait(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let ready_at = previous + self.interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last_call = Some(Instant::now());
    }

    /// Configured spacing
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }
}
