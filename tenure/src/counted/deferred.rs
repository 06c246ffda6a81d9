//! Collector-deferred shared handles.

use core::fmt;
use core::marker::PhantomData;

use super::Counting;
use crate::collector::Collector;
use crate::sync::Arc;

/// A reference-counted handle whose last release queues the allocation for a
/// background [`Collector`] instead of freeing it.
///
/// No release ever frees on the calling thread. The block is queued exactly
/// once, by the release that observed the count reach zero, and the collector
/// frees payload and block in the order blocks were queued.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use tenure::{Collector, Deferred};
///
/// let collector = Collector::new();
/// let a = Deferred::new_in(String::from("late"), &collector);
/// let b = a.clone();
///
/// drop(a);
/// drop(b);
/// assert_eq!(collector.pending(), 1);
///
/// collector.start().unwrap();
/// collector.wait_idle(Duration::from_secs(5)).unwrap();
/// assert_eq!(collector.pending(), 0);
/// # collector.stop();
/// ```
pub struct Deferred<T: Send + 'static> {
    inner: Counting<T>,
    collector: Arc<Collector>,
    _marker: PhantomData<std::sync::Arc<T>>,
}

impl<T: Send + 'static> Deferred<T> {
    /// Allocates `value`, reclaimed later by the process-wide collector.
    pub fn new(value: T) -> Self {
        Self::new_in(value, Collector::global())
    }

    /// Allocates `value`, reclaimed later by `collector`.
    pub fn new_in(value: T, collector: &Arc<Collector>) -> Self {
        Self::from_parts(Counting::new(value), Arc::clone(collector))
    }

    /// Creates a handle that references nothing, bound to the process-wide
    /// collector.
    pub fn empty() -> Self {
        Self::from_parts(Counting::empty(), Arc::clone(Collector::global()))
    }

    fn from_parts(inner: Counting<T>, collector: Arc<Collector>) -> Self {
        Self {
            inner,
            collector,
            _marker: PhantomData,
        }
    }

    /// Returns the shared value, or `None` if the handle is empty or dangling.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        // SAFETY: registered for the duration of `&self`; see `Shared::get`.
        self.inner.get().map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    /// Releases this handle's share.
    ///
    /// If this was the last share, the block is queued on the collector. The
    /// handle is empty afterwards.
    pub fn disown(&mut self) {
        if let Some(block) = self.inner.release() {
            // SAFETY: only the release that reached zero gets the block.
            unsafe { self.collector.retire(block) };
        }
    }

    /// Re-points this handle at the block `other` references.
    ///
    /// A previous block killed by this release goes to this handle's
    /// collector. Afterwards the handle retires into `other`'s collector, the
    /// one its new block was created for.
    pub fn claim(&mut self, other: &Deferred<T>) {
        if let Some(block) = self.inner.claim(&other.inner) {
            // SAFETY: as in `disown`.
            unsafe { self.collector.retire(block) };
        }
        if !Arc::ptr_eq(&self.collector, &other.collector) {
            self.collector = Arc::clone(&other.collector);
        }
    }

    /// Returns the number of live handles sharing the value.
    #[inline]
    pub fn count(&self) -> usize {
        self.inner.count()
    }

    /// Returns `true` if the handle no longer reaches a live value.
    #[inline]
    pub fn is_dangling(&self) -> bool {
        self.inner.is_dangling()
    }

    /// Returns `true` if both handles share the same allocation.
    #[inline]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.inner.ptr_eq(&other.inner)
    }

    /// Returns the collector this handle retires into.
    #[inline]
    pub fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }
}

impl<T: Send + 'static> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self::from_parts(self.inner.duplicate(), Arc::clone(&self.collector))
    }
}

impl<T: Send + 'static> Drop for Deferred<T> {
    fn drop(&mut self) {
        self.disown();
    }
}

impl<T: Send + 'static> Default for Deferred<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Send + fmt::Debug + 'static> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("value", &self.get())
            .field("count", &self.count())
            .finish()
    }
}
