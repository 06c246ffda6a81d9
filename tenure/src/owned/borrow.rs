//! Non-owning views of an [`Owning`] handle.

use core::fmt;
use core::ptr::NonNull;

use super::Owning;

/// A non-owning view of an [`Owning`] handle.
///
/// A `Borrowing` refers to the handle, not to the allocation. Every call
/// re-reads the owner's slot, so once the owner disowns or frees, the view
/// reports `None` even if an earlier call returned a live address. It never
/// frees anything and cannot outlive the owner it was created from.
///
/// # Example
///
/// ```rust
/// use tenure::Owning;
///
/// let owner = Owning::new(10u32);
/// let view = owner.borrow();
/// assert_eq!(view.with(|v| v + 1), Some(11));
///
/// let taken = owner.disown();
/// assert!(view.get().is_none());
/// # drop(taken);
/// ```
pub struct Borrowing<'a, T> {
    owner: &'a Owning<T>,
}

impl<'a, T> Borrowing<'a, T> {
    #[inline]
    pub(super) fn new(owner: &'a Owning<T>) -> Self {
        Self { owner }
    }

    /// Returns the owner's current address, or `None` if it owns nothing.
    ///
    /// This is a snapshot, not a liveness guarantee.
    #[inline]
    pub fn get(&self) -> Option<NonNull<T>> {
        self.owner.get()
    }

    /// Returns `true` while the owner holds an allocation.
    #[inline]
    pub fn is_live(&self) -> bool {
        !self.owner.is_empty()
    }

    /// Runs `f` against the borrowed value under the owner's lock.
    ///
    /// Returns `None` if the owner is empty.
    #[inline]
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.owner.with(f)
    }
}

impl<T> Clone for Borrowing<'_, T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Borrowing<'_, T> {}

impl<T> fmt::Debug for Borrowing<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Borrowing")
            .field("target", &self.get())
            .finish()
    }
}
