//! Public types for the connection manager.

use std::time::Duration;

use rand::Rng;

/// Lifecycle state of the cloud connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket; waiting for the next attempt.
    Disconnected,
    /// TCP connect in progress.
    Connecting,
    /// Socket established, pumps running.
    Connected,
    /// Pumps stopping, socket and queue being cleaned up.
    Closing,
    /// Terminal: no further reconnect attempts.
    Stopped,
}

/// Events emitted to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Connection state changed.
    StateChanged(ConnectionState),
    /// A reconnect is scheduled.
    Reconnecting { attempt: u32, next_retry_secs: f64 },
    /// The peer rejected this client. No reconnect follows.
    Terminated { reason: String },
}

/// Configuration for automatic reconnection with exponential backoff.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry (before jitter).
    pub base_delay: Duration,
    /// Maximum delay between attempts (backoff cap, before jitter).
    pub max_delay: Duration,
    /// Upper bound of the random delay before the first connect of the
    /// process.
    pub initial_jitter: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            initial_jitter: Duration::from_secs(5),
        }
    }
}

impl ReconnectConfig {
    /// Pre-jitter delay for a given attempt number (1-based):
    /// `min(base * 2^(attempt-1), max)`.
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.base_delay.as_secs_f64() * 2f64.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Delay for a given attempt number with a uniform `[0.5, 1.5)` factor
    /// applied to avoid synchronized retries.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = rand::thread_rng().gen_range(0.5..1.5);
        self.base_delay_for_attempt(attempt).mul_f64(factor)
    }

    /// Random delay in `[0, initial_jitter]` applied once at startup.
    pub fn initial_delay(&self) -> Duration {
        if self.initial_jitter.is_zero() {
            return Duration::ZERO;
        }
        let secs = rand::thread_rng().gen_range(0.0..=self.initial_jitter.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}
