//! Reconnection policy: exponential backoff with an attempt ceiling.
//!
//! DESIGN
//! ======
//! The policy is a pure state machine. The connection driver feeds it
//! connect/disconnect transitions and acts on the returned `Step`; the
//! backoff sleep itself lives in the driver task, so at most one reconnect
//! timer can be pending per client.
//!
//! ```text
//!   Idle ──connected──▶ Connected ──lost──▶ Reconnecting(1) ──lost──▶ … Reconnecting(n)
//!     ▲                     ▲                      │                         │
//!     │                     └──────connected───────┘               n == ceiling, lost
//!     └──────── manual disconnect (any state) ◀────────────────────── Exhausted
//! ```

use std::time::Duration;

pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Error message carried by the terminal `connection_status` event.
pub const EXHAUSTED_MESSAGE: &str = "Max reconnection attempts reached";

/// Backoff tuning. `delay(n) = min(base * 2^n, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Backoff before reconnect attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
    }
}

/// Where the connection sits in its reconnect lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectState {
    /// Never connected, or explicitly disconnected.
    #[default]
    Idle,
    Connected,
    /// Waiting out the backoff before attempt `attempt`.
    Reconnecting { attempt: u32 },
    /// Ceiling reached; only a manual `connect()` leaves this state.
    Exhausted { attempts: u32 },
}

/// What the driver should do after a lost or failed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Retry { attempt: u32, delay: Duration },
    GiveUp,
}

impl ReconnectState {
    /// Reconnect attempts made since the last successful connect.
    #[must_use]
    pub fn attempts(self) -> u32 {
        match self {
            Self::Idle | Self::Connected => 0,
            Self::Reconnecting { attempt } => attempt,
            Self::Exhausted { attempts } => attempts,
        }
    }

    #[must_use]
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// A connection opened; the counter resets.
    #[must_use]
    pub fn on_connected(self) -> Self {
        Self::Connected
    }

    /// An unplanned disconnect, or a connection attempt that failed to open.
    ///
    /// Returns the next state and the step the driver must take. Once the
    /// ceiling is reached the state stays `Exhausted` and no retry is issued.
    #[must_use]
    pub fn on_lost(self, policy: &ReconnectPolicy) -> (Self, Step) {
        let attempts = self.attempts();
        if attempts >= policy.max_attempts {
            return (Self::Exhausted { attempts }, Step::GiveUp);
        }
        let attempt = attempts + 1;
        (Self::Reconnecting { attempt }, Step::Retry { attempt, delay: policy.delay_for(attempt) })
    }

    /// Explicit `disconnect()`: terminal, never retried.
    #[must_use]
    pub fn on_manual_disconnect(self) -> Self {
        Self::Idle
    }
}

#[cfg(test)]
#[path = "reconnect_test.rs"]
mod tests;
