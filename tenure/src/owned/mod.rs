//! Exclusive Ownership Handles
//!
//! [`Owning<T>`] holds at most one heap allocation and frees it when dropped.
//! Ownership is a single transferable token: an allocation is only ever
//! reachable from one non-empty `Owning`, and moving it elsewhere empties the
//! source first.
//!
//! [`Borrowing<'a, T>`] is a non-owning view of an `Owning`. It re-reads the
//! owner's slot on every access, so it observes a disown immediately.
//!
//! # Ownership Transfer
//!
//! ```text
//!   a: Owning ──┐                      a: Owning (empty)
//!               ▼       pass_ownership_to
//!             [ T ]    ─────────────────────▶        b: Owning ──▶ [ T ]
//!   b: Owning (empty)
//! ```
//!
//! The payload is taken out of the source under the source's lock, the lock
//! is released, and only then is the destination locked. Two slot locks are
//! never held at once.

mod borrow;

pub use borrow::Borrowing;

use core::fmt;
use core::marker::PhantomData;
use core::ptr::NonNull;

use crate::slot::Slot;

/// A handle with exclusive ownership of one heap allocation.
///
/// Every mutator takes `&self`, so an `Owning` can be shared between threads
/// and still give its allocation away. [`Owning::with`] is the safe way to read
/// the value while other threads may disown it.
///
/// # Example
///
/// ```rust
/// use tenure::Owning;
///
/// let a = Owning::new(String::from("token"));
/// let b = Owning::empty();
///
/// a.pass_ownership_to(&b);
/// assert!(a.get().is_none());
/// assert_eq!(b.with(|s| s.len()), Some(5));
/// ```
pub struct Owning<T> {
    slot: Slot<T>,
    _marker: PhantomData<Box<T>>,
}

fn into_raw<T>(boxed: Box<T>) -> NonNull<T> {
    NonNull::from(Box::leak(boxed))
}

/// Rebuilds the box an `Owning` slot gave up.
///
/// # Safety
///
/// `ptr` must have been produced by `into_raw` and no longer be reachable from
/// any slot.
unsafe fn from_raw<T>(ptr: NonNull<T>) -> Box<T> {
    // SAFETY: Box provenance and uniqueness are the caller's contract.
    unsafe { Box::from_raw(ptr.as_ptr()) }
}

impl<T> Owning<T> {
    /// Allocates `value` and takes ownership of it.
    #[inline]
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }

    /// Takes ownership of an existing allocation.
    #[inline]
    pub fn from_box(boxed: Box<T>) -> Self {
        Self {
            slot: Slot::new(Some(into_raw(boxed))),
            _marker: PhantomData,
        }
    }

    /// Creates a handle that owns nothing.
    #[inline]
    pub fn empty() -> Self {
        Self {
            slot: Slot::empty(),
            _marker: PhantomData,
        }
    }

    /// Stores `boxed` in this handle.
    ///
    /// Claiming over a live payload does not free it. The displaced
    /// allocation is returned so the caller decides its fate.
    #[must_use = "dropping the displaced allocation frees it"]
    pub fn claim(&self, boxed: Box<T>) -> Option<Box<T>> {
        self.slot
            .claim(Some(into_raw(boxed)))
            // SAFETY: the displaced address came from `into_raw` and the slot
            // no longer refers to it.
            .map(|ptr| unsafe { from_raw(ptr) })
    }

    /// Gives up the allocation without freeing it.
    ///
    /// Returns `None` if the handle was already empty.
    pub fn disown(&self) -> Option<Box<T>> {
        // SAFETY: as in `claim`.
        self.slot.disown().map(|ptr| unsafe { from_raw(ptr) })
    }

    /// Moves this handle's allocation into `other`.
    ///
    /// Afterwards `self` is empty and `other` owns the allocation, so at most
    /// one of them will ever free it. Whatever `other` held before is returned
    /// rather than leaked. Passing ownership to the same handle is a no-op.
    pub fn pass_ownership_to(&self, other: &Owning<T>) -> Option<Box<T>> {
        if core::ptr::eq(self, other) {
            return None;
        }

        let ptr = self.slot.disown()?;
        other
            .slot
            .claim(Some(ptr))
            // SAFETY: as in `claim`.
            .map(|displaced| unsafe { from_raw(displaced) })
    }

    /// Frees the allocation now. No-op if the handle is empty.
    pub fn free(&self) {
        // SAFETY: an `Owning` slot only ever holds addresses from `into_raw`,
        // and the slot is their sole owner.
        unsafe { self.slot.free() };
    }

    /// Returns a snapshot of the owned address, or `None` when empty.
    ///
    /// The address can be invalidated by a concurrent disown or free as soon
    /// as this returns. Use [`Owning::with`] to read the value.
    #[inline]
    pub fn get(&self) -> Option<NonNull<T>> {
        self.slot.get()
    }

    /// Returns `true` if the handle owns nothing.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slot.is_empty()
    }

    /// Runs `f` against the owned value while holding the slot lock.
    ///
    /// A concurrent disown or free waits for `f` to return. `f` must not call
    /// back into this handle's mutators, the lock is not reentrant.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = self.slot.lock();
        // SAFETY: the lock is held, so nothing can take or free the value
        // until `f` is done with it.
        let result = (*guard).map(|ptr| f(unsafe { ptr.as_ref() }));
        drop(guard);
        result
    }

    /// Returns a mutable reference to the owned value.
    #[inline]
    pub fn get_mut(&mut self) -> Option<&mut T> {
        // SAFETY: `&mut self` excludes every other accessor, borrowing
        // handles included.
        self.slot.get().map(|mut ptr| unsafe { ptr.as_mut() })
    }

    /// Consumes the handle, returning its allocation.
    pub fn into_box(self) -> Option<Box<T>> {
        // Drop then sees an empty slot.
        self.disown()
    }

    /// Creates a non-owning view of this handle.
    #[inline]
    pub fn borrow(&self) -> Borrowing<'_, T> {
        Borrowing::new(self)
    }
}

impl<T> Drop for Owning<T> {
    fn drop(&mut self) {
        self.free();
    }
}

impl<T> Default for Owning<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> From<Box<T>> for Owning<T> {
    fn from(boxed: Box<T>) -> Self {
        Self::from_box(boxed)
    }
}

impl<T: fmt::Debug> fmt::Debug for Owning<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with(|value| f.debug_tuple("Owning").field(value).finish())
            .unwrap_or_else(|| f.write_str("Owning(<empty>)"))
    }
}
