//! Exponential backoff with additive jitter.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Upper bound of the random extra delay, as a fraction of the clamped delay.
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

fn default_base_delay_ms() -> u64 { 1_000 }
fn default_multiplier()    -> f64 { 2.0 }
fn default_max_delay_ms()  -> u64 { 30_000 }
fn default_jitter_ratio()  -> f64 { 0.3 }

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

/// Computes retry delays: `base * multiplier^attempt`, clamped to `max`,
/// plus up to `jitter_ratio` of the clamped value. Jitter only ever adds and
/// is not re-clamped, so a delay may exceed `max` by up to the jitter ratio.
#[derive(Debug, Clone, Default)]
pub struct BackoffCalculator {
    config: BackoffConfig,
}

impl BackoffCalculator {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Delay before retry number `attempt` (0-based), with a random jitter draw.
    pub fn delay(&self, attempt: u32) -> Duration {
        let fraction = if self.config.jitter_ratio > 0.0 {
            rand::thread_rng().gen_range(0.0..=self.config.jitter_ratio)
        } else {
            0.0
        };
        self.delay_with_jitter(attempt, fraction)
    }

    /// Deterministic form of [`delay`](Self::delay) for a given jitter fraction.
    pub fn delay_with_jitter(&self, attempt: u32, fraction: f64) -> Duration {
        let clamped = self.clamped_ms(attempt);
        let extra = clamped * fraction.clamp(0.0, self.config.jitter_ratio.max(0.0));
        Duration::from_millis((clamped + extra).round() as u64)
    }

    /// `base * multiplier^attempt`, clamped to the configured maximum.
    pub fn clamped_ms(&self, attempt: u32) -> f64 {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let raw = self.config.base_delay_ms as f64 * self.config.multiplier.powi(exp);
        raw.min(self.config.max_delay_ms as f64)
    }
}
