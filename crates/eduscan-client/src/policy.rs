//! Reconnect and heartbeat policy for the transport
//!
//! Scanning sessions do not reconnect on their own: a dropped connection
//! needs an explicit new `connect()`. The policy exists so callers that want
//! retries or keep-alive pings opt in explicitly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff between connection attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    /// Delay before the second attempt, in milliseconds
    #[serde(default = "default_initial_ms")]
    pub initial_ms: u64,

    /// Factor applied to the delay after each failed attempt
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Upper bound on any single delay, in milliseconds
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_ms: default_initial_ms(),
            multiplier: default_multiplier(),
            max_ms: default_max_ms(),
        }
    }
}

fn default_initial_ms() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_ms() -> u64 {
    10_000
}

impl Backoff {
    /// Delay after the given failed attempt (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.initial_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        Duration::from_millis(millis.min(self.max_ms as f64) as u64)
    }
}

/// Connection retry and keep-alive policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Total connection attempts per `connect()` (1 = no retry)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay schedule between attempts
    #[serde(default)]
    pub backoff: Backoff,

    /// Interval between WebSocket pings while connected
    #[serde(default)]
    pub heartbeat_ms: Option<u64>,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

impl ReconnectPolicy {
    /// Single attempt, no heartbeat
    pub fn disabled() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: Backoff::default(),
            heartbeat_ms: None,
        }
    }

    /// Retry up to `max_attempts` total attempts with the given backoff
    pub fn retrying(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            heartbeat_ms: None,
        }
    }

    /// Enable keep-alive pings
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_ms = Some(interval.as_millis() as u64);
        self
    }

    /// Whether another attempt is allowed after `attempt` failures
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the attempt following `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    pub fn heartbeat(&self) -> Option<Duration> {
        self.heartbeat_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}
