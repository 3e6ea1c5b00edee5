//! History Store
//!
//! Append-only, totally-ordered log of [`Operation`]s for one test run.
//! Appends from concurrent emitters are serialized; the resulting append order
//! is the authoritative interleaving that checkers see. Wall-clock timestamps
//! may reorder across threads and are informational only.
//!
//! [`ActiveHistories`] is the broadcast set: during a run there is exactly one
//! active history, but appends fan out to every member so a side recorder can
//! tee the stream.

use crate::operation::Operation;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors from the history store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
    /// The history has been frozen for checking; no further appends.
    #[error("history is frozen; the workload has completed")]
    Frozen,

    /// An emit arrived with no history in the active set.
    #[error("no active history to append to")]
    NoActiveHistories,
}

/// Append-only operation log. Thread-safe; appends are serialized.
#[derive(Debug, Default)]
pub struct History {
    ops: Mutex<Vec<Operation>>,
    frozen: AtomicBool,
}

impl History {
    /// Create an empty, unfrozen history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one operation. Fails once the history is frozen.
    pub fn append(&self, op: Operation) -> Result<(), HistoryError> {
        if self.frozen.load(Ordering::Acquire) {
            return Err(HistoryError::Frozen);
        }
        let mut ops = self.ops.lock().unwrap_or_else(|e| e.into_inner());
        ops.push(op);
        Ok(())
    }

    /// Number of operations appended so far.
    pub fn len(&self) -> usize {
        self.ops.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the history is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clone the current contents in append order.
    pub fn snapshot(&self) -> Vec<Operation> {
        self.ops.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Freeze the history and return its final contents. Subsequent appends
    /// fail with [`HistoryError::Frozen`]. Idempotent.
    pub fn freeze(&self) -> Vec<Operation> {
        self.frozen.store(true, Ordering::Release);
        self.snapshot()
    }

    /// Whether [`History::freeze`] has been called.
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }
}

/// The set of histories currently receiving appends.
///
/// Broadcasting holds the set lock for the duration of the append, which is
/// what makes the append order a single total order across all members even
/// under concurrent emitters.
#[derive(Debug, Default)]
pub struct ActiveHistories {
    sinks: Mutex<Vec<Arc<History>>>,
}

impl ActiveHistories {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a history to the active set.
    pub fn add(&self, history: Arc<History>) {
        let mut sinks = self.sinks.lock().unwrap_or_else(|e| e.into_inner());
        sinks.push(history);
    }

    /// Remove a history from the active set.
    pub fn remove(&self, history: &Arc<History>) {
        let mut sinks = self.sinks.lock().unwrap_or_else(|e| e.into_inner());
        sinks.retain(|h| !Arc::ptr_eq(h, history));
    }

    /// Append `op` to every member of the set atomically with respect to
    /// other broadcasts.
    pub fn broadcast(&self, op: Operation) -> Result<(), HistoryError> {
        let sinks = self.sinks.lock().unwrap_or_else(|e| e.into_inner());
        if sinks.is_empty() {
            return Err(HistoryError::NoActiveHistories);
        }
        for sink in sinks.iter() {
            sink.append(op.clone())?;
        }
        Ok(())
    }
}
