//! Cooperative cancellation for ramps and auto-cycle workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Longest uninterrupted sleep; bounds how long a cancelled task keeps running.
pub const CHECK_INTERVAL: Duration = Duration::from_millis(5);

/// Cancellation flag shared between a task and whoever may abort it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Sleep for `duration` in slices of at most [`CHECK_INTERVAL`].
    ///
    /// Returns `true` if the full duration elapsed, `false` as soon as the
    /// token is found cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.is_cancelled() {
                return false;
            }
            let slice = remaining.min(CHECK_INTERVAL);
            std::thread::sleep(slice);
            remaining -= slice;
        }
        !self.is_cancelled()
    }

    /// Millisecond convenience wrapper around [`CancelToken::sleep`].
    pub fn sleep_ms(&self, ms: u32) -> bool {
        self.sleep(Duration::from_millis(u64::from(ms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_uncancelled_sleep_completes() {
        let token = CancelToken::new();
        let start = Instant::now();
        assert!(token.sleep_ms(20));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_zero_sleep_reports_state() {
        let token = CancelToken::new();
        assert!(token.sleep_ms(0));
        token.cancel();
        assert!(!token.sleep_ms(0));
    }

    #[test]
    fn test_cancel_interrupts_long_sleep() {
        let token = CancelToken::new();
        let remote = token.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });

        let start = Instant::now();
        assert!(!token.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(1));
        canceller.join().expect("canceller thread");
    }
}
