//! Countdown Latch
//!
//! Run-to-end-of-phase modules wait on this to learn when every run-once
//! sibling in their phase has completed.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// One-shot countdown. Counts down to zero, never back up.
#[derive(Debug)]
pub struct CountdownLatch {
    count: Mutex<usize>,
    zero: Condvar,
}

impl CountdownLatch {
    /// Create a latch with the given initial count. A count of zero is open
    /// from the start.
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            zero: Condvar::new(),
        }
    }

    /// Decrement the count, waking all waiters when it reaches zero.
    /// Decrementing an open latch is a no-op.
    pub fn count_down(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        if *count > 0 {
            *count -= 1;
            if *count == 0 {
                self.zero.notify_all();
            }
        }
    }

    /// The current count.
    pub fn count(&self) -> usize {
        *self.count.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block until the count reaches zero.
    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        while *count > 0 {
            count = self
                .zero
                .wait(count)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Block until the count reaches zero or `timeout` elapses.
    /// Returns `true` if the latch opened.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        while *count > 0 {
            let remaining = match deadline.checked_duration_since(std::time::Instant::now()) {
                Some(d) if !d.is_zero() => d,
                _ => return false,
            };
            let (guard, result) = self
                .zero
                .wait_timeout(count, remaining)
                .unwrap_or_else(|e| e.into_inner());
            count = guard;
            if result.timed_out() && *count > 0 {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_zero_count_is_open_immediately() {
        let latch = CountdownLatch::new(0);
        assert_eq!(latch.count(), 0);
        latch.wait();
        assert!(latch.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_count_down_does_not_underflow() {
        let latch = CountdownLatch::new(1);
        latch.count_down();
        latch.count_down();
        assert_eq!(latch.count(), 0);
    }

    #[test]
    fn test_wait_releases_when_last_count_arrives() {
        let latch = Arc::new(CountdownLatch::new(2));

        let waiter = {
            let latch = latch.clone();
            std::thread::spawn(move || latch.wait())
        };

        latch.count_down();
        std::thread::sleep(Duration::from_millis(10));
        latch.count_down();
        waiter.join().unwrap();
        assert_eq!(latch.count(), 0);
    }

    #[test]
    fn test_wait_timeout_expires() {
        let latch = CountdownLatch::new(1);
        assert!(!latch.wait_timeout(Duration::from_millis(10)));
    }
}
