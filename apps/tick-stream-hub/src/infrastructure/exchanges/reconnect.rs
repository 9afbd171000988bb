//! Reconnection Backoff Policy
//!
//! Exponential backoff with additive jitter for exchange session restarts.
//! The delay for retry `n` is `base × 2^min(n, cap_exponent)` plus a uniform
//! jitter in `[0, base)`, the whole capped at a configured maximum. The retry
//! counter resets only after a session stays connected longer than the
//! stability threshold, so a venue that flaps every few seconds keeps
//! climbing the curve instead of hammering the endpoint.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    /// Base delay; also the width of the jitter band.
    pub base: Duration,
    /// Exponent ceiling for the doubling term.
    pub cap_exponent: u32,
    /// Hard ceiling on the total delay.
    pub max_delay: Duration,
    /// Connected duration after which the retry counter resets.
    pub stability_threshold: Duration,
    /// Disable to make delays deterministic (tests).
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap_exponent: 6,
            max_delay: Duration::from_secs(60),
            stability_threshold: Duration::from_secs(30),
            jitter: true,
        }
    }
}

/// Mutable backoff state for one supervised connection.
#[derive(Debug)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    retry_count: u32,
}

impl BackoffPolicy {
    /// Create a policy with zero accumulated retries.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            retry_count: 0,
        }
    }

    /// Delay before the next connection attempt. Increments the retry
    /// counter as a side effect.
    #[must_use]
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.retry_count);
        self.retry_count = self.retry_count.saturating_add(1);
        delay
    }

    /// Failures recorded since the last reset.
    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Record the outcome of a finished session: a stay at or above the
    /// stability threshold resets the curve.
    pub const fn note_session_outcome(&mut self, connected_for: Duration) {
        if connected_for.as_millis() >= self.config.stability_threshold.as_millis() {
            self.retry_count = 0;
        }
    }

    /// Reset the retry counter unconditionally.
    pub const fn reset(&mut self) {
        self.retry_count = 0;
    }

    fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.min(self.config.cap_exponent);
        let base_ms = self.config.base.as_millis();
        let scaled_ms = base_ms.saturating_mul(1u128 << exponent);

        let jitter_ms = if self.config.jitter && base_ms > 0 {
            #[allow(clippy::cast_possible_truncation)]
            let bound = base_ms as u64;
            u128::from(rand::rng().random_range(0..bound))
        } else {
            0
        };

        let total_ms = scaled_ms
            .saturating_add(jitter_ms)
            .min(self.config.max_delay.as_millis());
        Duration::from_millis(u64::try_from(total_ms).unwrap_or(u64::MAX))
    }
}
