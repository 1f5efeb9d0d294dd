use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Run-wide "stop starting new work" flag.
///
/// Once raised, schedulers sharing the signal admit no new window and
/// discard tasks that have not been dispatched; attempts already in flight
/// finish normally. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    raised: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_flag() {
        let signal = AbortSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_raised());
        signal.raise();
        assert!(observer.is_raised());
    }
}
