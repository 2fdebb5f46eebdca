//! Keepalive scheduler — renews a long-lived watch before the server drops it.
//!
//! IMAP servers terminate an IDLE after roughly 30 minutes. The session races
//! `tick()` against the watch and re-issues it whenever a tick fires.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

use onebox_core::error::ConfigError;

/// Default renewal interval: 29 minutes.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(29 * 60);

/// Default server idle timeout: 30 minutes.
pub const DEFAULT_SERVER_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Fires strictly before the server's idle timeout.
///
/// The underlying timer is created lazily, so the scheduler can be built
/// outside a runtime and only needs one once it starts ticking.
#[derive(Debug)]
pub struct KeepaliveScheduler {
    interval: Duration,
    ticker: Option<Interval>,
}

impl KeepaliveScheduler {
    /// Fails unless `0 < interval < server_timeout`.
    pub fn new(interval: Duration, server_timeout: Duration) -> Result<Self, ConfigError> {
        if interval.is_zero() || interval >= server_timeout {
            return Err(ConfigError::Invalid(format!(
                "keepalive interval {:?} must be non-zero and shorter than the server idle timeout {:?}",
                interval, server_timeout
            )));
        }
        Ok(Self {
            interval,
            ticker: None,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Restart the countdown: the next tick fires one full interval from now.
    pub fn reset(&mut self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        // A late tick pushes the schedule back instead of bursting to catch up.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
    }

    /// Wait for the next renewal. Cancel-safe.
    pub async fn tick(&mut self) {
        if self.ticker.is_none() {
            self.reset();
        }
        if let Some(ticker) = self.ticker.as_mut() {
            ticker.tick().await;
        }
    }
}
