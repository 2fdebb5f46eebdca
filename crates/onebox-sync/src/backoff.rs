//! Reconnect delay policy.
//!
//! `delay(0)` is zero (the first connect is immediate). After that the delay
//! doubles from `base` per consecutive failure and is clamped at `cap`.
//! A successful connect resets the attempt counter in the session.

use std::time::Duration;

use onebox_core::config::SyncConfig;

// ─────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────

/// Default first retry delay.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Default ceiling for any retry delay.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(5 * 60);

/// Jitter adds at most this fraction of the nominal delay.
const JITTER_FRACTION: f64 = 0.1;

// ─────────────────────────────────────────────
// BackoffPolicy
// ─────────────────────────────────────────────

/// Capped exponential backoff with optional jitter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    cap: Duration,
    jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP)
    }
}

impl BackoffPolicy {
    /// Policy without jitter. A `cap` below `base` is raised to `base`.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.backoff_base(), config.backoff_cap()).with_jitter(config.backoff_jitter)
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// Nominal delay before retry number `attempt` (no jitter).
    ///
    /// Monotonically non-decreasing in `attempt` and never above `cap`.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Delay to actually sleep: the nominal delay plus jitter when enabled,
    /// still clamped at `cap`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let nominal = self.delay(attempt);
        if !self.jitter || nominal.is_zero() {
            return nominal;
        }
        let extra = nominal.mul_f64(JITTER_FRACTION * rand_jitter());
        nominal.saturating_add(extra).min(self.cap)
    }
}

/// Pseudo-random value in `[0, 1)` from the clock's sub-second nanos.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos as f64) / 1_000_000_000.0
}
