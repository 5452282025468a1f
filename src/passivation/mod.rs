//! Idle eviction of entity instances.
//!
//! The timer is owned by the instance and only tracks a deadline; the session
//! loop sleeps until that deadline and reports expiry back to the instance.

use std::time::Duration;

use tokio::time::Instant;

/// How long an idle instance stays resident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassivationStrategy {
    timeout: Duration,
}

impl PassivationStrategy {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Longest idle timeout accepted from configuration (30 days).
    pub const MAX_TIMEOUT: Duration = Duration::from_secs(30 * 86_400);

    pub fn default_timeout() -> Self {
        Self::timeout(Self::DEFAULT_TIMEOUT)
    }

    pub fn timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn duration(&self) -> Duration {
        self.timeout
    }
}

impl Default for PassivationStrategy {
    fn default() -> Self {
        Self::default_timeout()
    }
}

/// `now + timeout`, saturating at the timer wheel's horizon.
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout.min(PassivationStrategy::MAX_TIMEOUT))
        .unwrap_or(now)
}

/// Idle deadline for one instance. Disarmed while a command is in flight
/// or a passivation request is outstanding.
#[derive(Debug, Clone)]
pub struct PassivationTimer {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl PassivationTimer {
    pub fn new(strategy: PassivationStrategy) -> Self {
        Self {
            timeout: strategy.duration(),
            deadline: None,
        }
    }

    /// Arm (or re-arm) the timer from now.
    pub fn reset(&mut self) {
        self.deadline = Some(deadline_after(self.timeout));
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
