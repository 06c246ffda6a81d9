//! Synchronously reclaimed shared handles.

use core::fmt;
use core::marker::PhantomData;

use super::{CountedBlock, Counting};

/// A reference-counted handle that frees its allocation on the last release.
///
/// Reclamation happens on the thread whose release takes the count to zero,
/// before that release returns. Use it when reclamation timing must be
/// deterministic.
///
/// # Example
///
/// ```rust
/// use tenure::Shared;
///
/// let first = Shared::new(vec![1, 2, 3]);
/// let second = first.clone();
/// assert_eq!(first.count(), 2);
///
/// drop(first);
/// assert_eq!(second.get().map(Vec::len), Some(3));
/// ```
pub struct Shared<T> {
    inner: Counting<T>,
    _marker: PhantomData<std::sync::Arc<T>>,
}

impl<T> Shared<T> {
    /// Allocates `value` in a new block with a count of one.
    pub fn new(value: T) -> Self {
        Self::from_inner(Counting::new(value))
    }

    /// Creates a handle that references nothing.
    pub fn empty() -> Self {
        Self::from_inner(Counting::empty())
    }

    fn from_inner(inner: Counting<T>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// Returns the shared value, or `None` if the handle is empty or dangling.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        // SAFETY: this handle stays registered with the block for as long as
        // `&self` is borrowed, because releasing needs `&mut self`.
        self.inner.get().map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    /// Releases this handle's share.
    ///
    /// If this was the last share, the value and its block are freed before
    /// the call returns. The handle is empty afterwards.
    pub fn disown(&mut self) {
        if let Some(block) = self.inner.release() {
            // SAFETY: `release` hands the block only to the caller that took
            // the count to zero.
            unsafe { CountedBlock::reclaim(block) };
        }
    }

    /// Re-points this handle at the block `other` references.
    ///
    /// The previous block is released as in [`Shared::disown`].
    pub fn claim(&mut self, other: &Shared<T>) {
        if let Some(block) = self.inner.claim(&other.inner) {
            // SAFETY: as in `disown`.
            unsafe { CountedBlock::reclaim(block) };
        }
    }

    /// Returns the number of live handles sharing the value.
    ///
    /// Zero for an empty handle.
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
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self::from_inner(self.inner.duplicate())
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        self.disown();
    }
}

impl<T> Default for Shared<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> From<T> for Shared<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("value", &self.get())
            .field("count", &self.count())
            .finish()
    }
}
