//! Provider-wide call spacing.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_min_spacing_ms")]
    pub min_spacing_ms: u64,
}

fn default_min_spacing_ms() -> u64 { 500 }

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { min_spacing_ms: default_min_spacing_ms() }
    }
}

/// Enforces a minimum gap between consecutive granted calls.
///
/// The lock is held across the wait, so concurrent callers are granted one
/// at a time and each is spaced from the previous grant.
#[derive(Debug)]
pub struct RateLimiter {
    min_spacing: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_spacing: Duration) -> Self {
        Self { min_spacing, last_call: Mutex::new(None) }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(Duration::from_millis(config.min_spacing_ms))
    }

    pub fn min_spacing(&self) -> Duration {
        self.min_spacing
    }

    /// Suspends until at least `min_spacing` has passed since the previous grant.
    pub async fn acquire(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.min_spacing;
            let now = Instant::now();
            if ready_at > now {
                debug!(wait_ms = (ready_at - now).as_millis() as u64, "rate limiter holding call");
                sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}
