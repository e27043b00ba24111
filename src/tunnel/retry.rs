//! Reconnect budget shared by the initial connect and in-relay recovery

use std::time::Duration;

/// Counts retry attempts for one logical tunnel. Reset only after a
/// successful (re)connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryBudget {
    current: u32,
    max: u32,
    delay: Duration,
}

impl RetryBudget {
    pub fn new(max: u32, delay: Duration) -> Self {
        Self {
            current: 0,
            max,
            delay,
        }
    }

    /// Budget that never allows a retry
    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Take one attempt from the budget. Returns false when exhausted.
    pub fn try_consume(&mut self) -> bool {
        if self.current >= self.max {
            return false;
        }
        self.current += 1;
        true
    }

    pub fn reset(&mut self) {
        self.current = 0;
    }

    pub fn is_exhausted(&self) -> bool {
        self.current >= self.max
    }

    pub fn attempts(&self) -> u32 {
        self.current
    }

    pub fn max_attempts(&self) -> u32 {
        self.max
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}
