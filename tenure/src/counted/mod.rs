//! Reference-Counted Handles
//!
//! A counted block pairs one allocation with a use count. Every counting
//! handle that points at the block has registered itself in that count, and
//! the handle whose release takes the count from 1 to 0 is the only one that
//! may act on the block's payload.
//!
//! Two front-ends share the counting logic and differ only in what they do
//! with a dead block:
//!
//! | Handle        | On the 1 → 0 release                              |
//! |---------------|---------------------------------------------------|
//! | [`Shared`]    | frees payload and block on the releasing thread   |
//! | [`Deferred`]  | queues the block for the [`Collector`]            |
//!
//! # Lock Order
//!
//! A handle's own slot lock is taken first, then the block's count lock.
//! No operation ever holds two slot locks at once, so the two lock domains
//! cannot deadlock against each other.
//!
//! [`Collector`]: crate::Collector

mod deferred;
mod shared;

pub use deferred::Deferred;
pub use shared::Shared;

use core::fmt;
use core::ptr::NonNull;

use crate::slot::Slot;
use crate::sync::Mutex;

/// One allocation plus the number of live handles referencing it.
///
/// Blocks are only reachable through [`Shared`] and [`Deferred`] handles; the
/// count is never read or written without holding its lock.
pub(crate) struct CountedBlock<T> {
    payload: Slot<T>,
    count: Mutex<usize>,
}

impl<T> CountedBlock<T> {
    /// Allocates a block around `value` with a count of zero.
    ///
    /// The first handle to store the block brings the count to one.
    pub(crate) fn allocate(value: T) -> NonNull<Self> {
        let block = Box::new(Self {
            payload: Slot::new(Some(NonNull::from(Box::leak(Box::new(value))))),
            count: Mutex::new(0),
        });
        NonNull::from(Box::leak(block))
    }

    /// Registers one more handle, returning the new count.
    pub(crate) fn increment(&self) -> usize {
        let mut count = self.count.lock();
        *count += 1;
        *count
    }

    /// Unregisters one handle, returning the new count.
    ///
    /// # Panics
    ///
    /// Panics if the count is already zero. An unpaired release means some
    /// handle freed or queued a block it was still counted in, and carrying on
    /// would corrupt the dangling check.
    pub(crate) fn decrement(&self) -> usize {
        let mut count = self.count.lock();
        if *count == 0 {
            tracing::error!(block = ?(self as *const Self), "release of a block with no live handles");
            panic!("counted block released more times than it was acquired");
        }
        *count -= 1;
        *count
    }

    /// Returns the number of handles currently registered.
    #[inline]
    pub(crate) fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Returns `true` once the count has reached zero.
    #[inline]
    pub(crate) fn is_dangling(&self) -> bool {
        self.count() < 1
    }

    /// Returns the payload address.
    #[inline]
    pub(crate) fn payload(&self) -> Option<NonNull<T>> {
        self.payload.get()
    }

    /// Frees the payload, then the block record itself.
    ///
    /// # Safety
    ///
    /// `block` must come from [`CountedBlock::allocate`], its count must have
    /// reached zero, and the caller must be the single releaser that observed
    /// that transition.
    pub(crate) unsafe fn reclaim(block: NonNull<Self>) {
        // SAFETY: allocate() produced the block via Box; the caller owns it now.
        let block = unsafe { Box::from_raw(block.as_ptr()) };
        debug_assert!(block.is_dangling());
        // SAFETY: the payload slot owns a Box allocation no handle can reach.
        unsafe { block.payload.free() };
    }
}

impl<T> fmt::Debug for CountedBlock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountedBlock")
            .field("payload", &self.payload())
            .field("count", &self.count())
            .finish()
    }
}

/// Counting behavior shared by [`Shared`] and [`Deferred`].
///
/// A non-empty slot always means the handle is registered in the block's
/// count. Mutators take `&mut self`, so no reference handed out by
/// [`Counting::get`] can outlive the registration that keeps it valid.
pub(crate) struct Counting<T> {
    slot: Slot<CountedBlock<T>>,
}

impl<T> Counting<T> {
    /// Allocates a fresh block around `value` and registers with it.
    pub(crate) fn new(value: T) -> Self {
        let handle = Self::empty();
        handle.store(Some(CountedBlock::allocate(value)));
        handle
    }

    /// Creates a handle referencing no block.
    pub(crate) fn empty() -> Self {
        Self { slot: Slot::empty() }
    }

    /// Points an empty handle at `block`, registering with it.
    fn store(&self, block: Option<NonNull<CountedBlock<T>>>) {
        let mut slot = self.slot.lock();
        debug_assert!(slot.is_none(), "store over a registered block");
        *slot = block;
        if let Some(block) = block {
            // SAFETY: the block is live: either freshly allocated or held by
            // the handle we are cloning from, which cannot release meanwhile.
            unsafe { block.as_ref() }.increment();
        }
    }

    /// Returns the block this handle is registered with.
    #[inline]
    pub(crate) fn block(&self) -> Option<NonNull<CountedBlock<T>>> {
        self.slot.get()
    }

    /// Creates a second handle registered with the same block.
    pub(crate) fn duplicate(&self) -> Self {
        let handle = Self::empty();
        handle.store(self.block());
        handle
    }

    /// Re-points this handle at `other`'s block.
    ///
    /// The new block's count is taken before the old one is released, so
    /// claiming the block already held never passes through zero. Returns the
    /// old block if this release killed it.
    #[must_use]
    pub(crate) fn claim(&mut self, other: &Counting<T>) -> Option<NonNull<CountedBlock<T>>> {
        let next = other.block();
        let mut slot = self.slot.lock();
        if let Some(block) = next {
            // SAFETY: `other` is registered with the block and borrowed for
            // the whole call.
            unsafe { block.as_ref() }.increment();
        }
        let previous = core::mem::replace(&mut *slot, next);
        previous.and_then(|block| Self::unregister(block))
    }

    /// Unregisters from the current block and clears the slot.
    ///
    /// Returns the block only to the caller whose decrement reached zero.
    #[must_use]
    pub(crate) fn release(&mut self) -> Option<NonNull<CountedBlock<T>>> {
        let mut slot = self.slot.lock();
        slot.take().and_then(|block| Self::unregister(block))
    }

    fn unregister(block: NonNull<CountedBlock<T>>) -> Option<NonNull<CountedBlock<T>>> {
        // SAFETY: the caller was registered with the block until now, so it
        // is still allocated.
        let remaining = unsafe { block.as_ref() }.decrement();
        (remaining == 0).then_some(block)
    }

    /// Returns the payload, or `None` if empty or the block is dangling.
    pub(crate) fn get(&self) -> Option<NonNull<T>> {
        let slot = self.slot.lock();
        let block = (*slot)?;
        // SAFETY: this handle is registered, so the block is allocated.
        let block = unsafe { block.as_ref() };
        if block.is_dangling() {
            return None;
        }
        block.payload()
    }

    /// Returns the block's count, or zero if this handle is empty.
    pub(crate) fn count(&self) -> usize {
        let slot = self.slot.lock();
        // SAFETY: registered, as in `get`.
        (*slot).map_or(0, |block| unsafe { block.as_ref() }.count())
    }

    /// Returns `true` if this handle no longer reaches a live block.
    pub(crate) fn is_dangling(&self) -> bool {
        self.count() < 1
    }

    /// Returns `true` if both handles reference the same block.
    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        match (self.block(), other.block()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}
