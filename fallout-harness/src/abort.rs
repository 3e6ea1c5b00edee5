//! Abort Signal
//!
//! One atomic flag per workload. Setting it requests cooperative shutdown:
//! modules consult it through their context and return early; the engine
//! polls it between phases and refuses to launch further ones. Nothing is
//! ever forcibly terminated.

use fallout_core::AbortedCheck;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Shared, idempotent abort flag.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
}

impl AbortSignal {
    /// A fresh, unset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an abort. Idempotent; only the first call logs.
    pub fn set(&self) {
        if !self.flag.swap(true, Ordering::AcqRel) {
            warn!("test run abort requested");
        }
    }

    /// Whether an abort has been requested.
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// A read-only probe suitable for injection into module instances.
    pub fn as_check(&self) -> AbortedCheck {
        let flag = self.flag.clone();
        Arc::new(move || flag.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_is_idempotent() {
        let signal = AbortSignal::new();
        assert!(!signal.is_set());
        signal.set();
        signal.set();
        assert!(signal.is_set());
    }

    #[test]
    fn test_check_observes_the_flag() {
        let signal = AbortSignal::new();
        let check = signal.as_check();
        assert!(!check());
        signal.set();
        assert!(check());
    }

    #[test]
    fn test_clones_share_the_flag() {
        let signal = AbortSignal::new();
        let clone = signal.clone();
        clone.set();
        assert!(signal.is_set());
    }
}
