//! Collector Statistics
//!
//! Counters are bumped with relaxed atomics on the hot paths and read back as
//! a [`CollectorStats`] snapshot. The snapshot is not atomic as a whole: a
//! retire racing with `stats()` may show up in one field and not another.

use crate::sync::atomic::{AtomicU64, Ordering};

/// A point-in-time view of a collector's work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorStats {
    /// Blocks queued since the collector was created.
    pub retired: u64,
    /// Blocks freed since the collector was created.
    pub reclaimed: u64,
    /// Blocks waiting in the queue when the snapshot was taken.
    pub pending: usize,
}

impl CollectorStats {
    /// Blocks queued but not yet freed, including any being freed right now.
    pub fn outstanding(&self) -> u64 {
        self.retired.saturating_sub(self.reclaimed)
    }
}

pub(crate) struct Counters {
    retired: AtomicU64,
    reclaimed: AtomicU64,
}

impl Counters {
    pub(crate) fn new() -> Self {
        Self {
            retired: AtomicU64::new(0),
            reclaimed: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn record_retire(&self) {
        self.retired.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_reclaim(&self) {
        self.reclaimed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, pending: usize) -> CollectorStats {
        CollectorStats {
            retired: self.retired.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
            pending,
        }
    }
}
