//! Logical clock
//!
//! Per-node Lamport counter used to stamp versions.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic logical clock
///
/// `peek_next()` is always greater than anything passed to `observe()` so
/// far, so a local write supersedes every version this node has already
/// seen. A local write only moves the clock once it is committed, by
/// observing its own stamp.
#[derive(Debug, Default)]
pub struct LogicalClock {
    counter: AtomicU64,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// The reading a write stamped now would carry
    ///
    /// Does not advance the clock. Two writes on different keys may carry
    /// the same reading; writes on one key are serialized by its lock.
    pub fn peek_next(&self) -> u64 {
        self.counter.load(Ordering::SeqCst) + 1
    }

    /// Raise the clock to at least `seen`
    pub fn observe(&self, seen: u64) {
        self.counter.fetch_max(seen, Ordering::SeqCst);
    }

    /// Current reading without advancing
    pub fn now(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}
