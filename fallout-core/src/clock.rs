//! Workload Clock
//!
//! All operation timestamps are relative to a single origin captured when the
//! workload starts, so histories from different runs are comparable and the
//! first operation sits near zero.

use std::time::{Duration, Instant};

/// Monotonic clock anchored at the workload start.
#[derive(Debug, Clone, Copy)]
pub struct WorkloadClock {
    origin: Instant,
}

impl WorkloadClock {
    /// Capture the origin. Time zero is now.
    pub fn start_now() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Nanoseconds elapsed since the origin.
    pub fn now_ns(&self) -> u64 {
        let elapsed = self.origin.elapsed();
        u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
    }

    /// Elapsed time since the origin as a [`Duration`].
    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic() {
        let clock = WorkloadClock::start_now();
        let a = clock.now_ns();
        let b = clock.now_ns();
        assert!(b >= a);
    }

    #[test]
    fn test_clock_advances() {
        let clock = WorkloadClock::start_now();
        std::thread::sleep(Duration::from_millis(5));
        assert!(clock.now_ns() >= 5_000_000);
    }
}
