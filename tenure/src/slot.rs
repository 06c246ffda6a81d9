//! Lock-Guarded Payload Slot
//!
//! A [`Slot`] is the one piece of state every handle shares: a mutex around an
//! optional heap address. It has no opinion about ownership. Owning handles
//! treat the address as a `Box` they must free, counting handles treat it as a
//! block they have registered with, and borrowing handles only ever read it.
//!
//! All reads and writes of the address happen with the slot's lock held. A
//! value returned by [`Slot::get`] is a snapshot: by the time the caller looks
//! at it another thread may already have cleared the slot.

use core::fmt;
use core::ptr::NonNull;

use crate::sync::{Mutex, MutexGuard};

/// A mutually exclusive cell holding one heap address, or nothing.
///
/// The address is always typed as `*mut P`; casting it back to the right type
/// is never the caller's problem.
///
/// # Example
///
/// ```rust
/// use core::ptr::NonNull;
/// use tenure::Slot;
///
/// let raw = NonNull::from(Box::leak(Box::new(7u32)));
/// let slot = Slot::new(Some(raw));
/// assert_eq!(slot.get(), Some(raw));
///
/// // SAFETY: `raw` came from `Box::leak` and nothing else owns it.
/// unsafe { slot.free() };
/// assert!(slot.is_empty());
/// ```
pub struct Slot<P> {
    payload: Mutex<Option<NonNull<P>>>,
}

// SAFETY: the slot never produces `&P`. The only thing it can do with the
// address is hand it to another thread (claim/disown) or drop it as `Box<P>`
// (free), both of which need nothing more than `P: Send`.
unsafe impl<P: Send> Send for Slot<P> {}
unsafe impl<P: Send> Sync for Slot<P> {}

impl<P> Slot<P> {
    /// Creates a slot holding `payload`.
    #[inline]
    pub fn new(payload: Option<NonNull<P>>) -> Self {
        Self {
            payload: Mutex::new(payload),
        }
    }

    /// Creates an empty slot.
    #[inline]
    pub fn empty() -> Self {
        Self::new(None)
    }

    /// Overwrites the payload, returning the address it displaced.
    ///
    /// Nothing is freed. If the displaced address was owned, the caller now
    /// holds the only record of it.
    #[inline]
    pub fn claim(&self, payload: Option<NonNull<P>>) -> Option<NonNull<P>> {
        core::mem::replace(&mut *self.payload.lock(), payload)
    }

    /// Clears the payload without freeing it. Equivalent to `claim(None)`.
    #[inline]
    pub fn disown(&self) -> Option<NonNull<P>> {
        self.claim(None)
    }

    /// Returns a snapshot of the current payload.
    #[inline]
    pub fn get(&self) -> Option<NonNull<P>> {
        *self.payload.lock()
    }

    /// Returns `true` if the slot currently holds nothing.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.lock().is_none()
    }

    /// Frees the payload as a `Box<P>` and leaves the slot empty.
    ///
    /// Freeing an empty slot is a no-op.
    ///
    /// # Safety
    ///
    /// A non-empty payload must have come from `Box::into_raw` (or
    /// `Box::leak`) and this slot must be its sole owner.
    pub unsafe fn free(&self) {
        let mut payload = self.payload.lock();
        if let Some(ptr) = payload.take() {
            // SAFETY: caller guarantees Box provenance and sole ownership.
            drop(unsafe { Box::from_raw(ptr.as_ptr()) });
        }
    }

    /// Locks the slot for a multi-step update.
    ///
    /// Counting handles hold this guard while they adjust the block count, so
    /// the slot and the count it implies never disagree.
    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, Option<NonNull<P>>> {
        self.payload.lock()
    }
}

impl<P> Default for Slot<P> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<P> fmt::Debug for Slot<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot").field("payload", &self.get()).finish()
    }
}
