use std::time::Duration;

/// Pause inserted before a task re-enters admission after a transient error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryDelay {
    /// Retry as soon as a slot frees up
    #[default]
    None,
    /// Same pause before every retry
    Fixed(Duration),
    /// `step × attempts made so far`
    Linear(Duration),
}

/// Per-task retry budget.
///
/// `patience` counts attempts, not retries: a task that keeps failing
/// transiently is attempted exactly `patience` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    patience: u32,
    delay: RetryDelay,
}

impl RetryPolicy {
    /// A patience of zero is raised to one; every task gets an attempt.
    pub fn new(patience: u32, delay: RetryDelay) -> Self {
        Self {
            patience: patience.max(1),
            delay,
        }
    }

    pub fn patience(&self) -> u32 {
        self.patience
    }

    pub fn delay(&self) -> RetryDelay {
        self.delay
    }

    /// Whether a task that has made `attempts` attempts may try again.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.patience
    }

    /// Pause before the attempt following attempt number `attempts`.
    pub fn delay_after(&self, attempts: u32) -> Duration {
        match self.delay {
            RetryDelay::None => Duration::ZERO,
            RetryDelay::Fixed(delay) => delay,
            RetryDelay::Linear(step) => step.saturating_mul(attempts),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, RetryDelay::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patience_counts_attempts() {
        let policy = RetryPolicy::new(3, RetryDelay::None);
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
    }

    #[test]
    fn test_zero_patience_still_attempts_once() {
        let policy = RetryPolicy::new(0, RetryDelay::None);
        assert_eq!(policy.patience(), 1);
        assert!(!policy.allows_retry(1));
    }

    #[test]
    fn test_delays() {
        let step = Duration::from_millis(250);
        assert_eq!(RetryPolicy::default().delay_after(2), Duration::ZERO);
        assert_eq!(
            RetryPolicy::new(5, RetryDelay::Fixed(step)).delay_after(3),
            step
        );
        assert_eq!(
            RetryPolicy::new(5, RetryDelay::Linear(step)).delay_after(3),
            Duration::from_millis(750)
        );
    }
}
