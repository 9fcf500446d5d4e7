use std::time::Duration;

/// Doubling delay capped at a maximum
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial.min(max),
            max,
        }
    }

    /// Delay for the next wait; the i-th call returns `min(initial * 2^i, max)`
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }
}

/// Whether another attempt is allowed after `attempts` have been made.
///
/// A negative bound never runs out; otherwise `max_retries + 1` attempts are made.
pub fn attempts_remaining(max_retries: i32, attempts: u32) -> bool {
    max_retries < 0 || attempts <= max_retries as u32
}
