//! Conditional Synchronization Primitives
//!
//! Every lock, counter and thread the handles touch goes through this module,
//! so the same code runs against `parking_lot` in normal builds and against
//! Loom's model-checked primitives when verifying interleavings.
//!
//! # Loom Integration
//!
//! ```bash
//! RUSTFLAGS="--cfg loom" cargo test --features loom --test loom_verification --release
//! ```
//!
//! # API Shape
//!
//! `Mutex::lock` never returns a `Result`: `parking_lot` has no poisoning, and
//! the Loom adapter recovers the guard from a poisoned lock. `Condvar` takes and
//! returns guards by value, which is the one shape both backends can provide.

#[cfg(all(feature = "loom", loom))]
pub mod atomic {
    //! Atomic types for Loom model checking.

    pub use loom::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
}

#[cfg(not(all(feature = "loom", loom)))]
pub mod atomic {
    //! Standard library atomic types.

    pub use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
}

#[cfg(all(feature = "loom", loom))]
pub mod thread {
    //! Loom thread primitives for model checking.

    pub use loom::thread::{spawn, yield_now, Builder, JoinHandle};
}

#[cfg(not(all(feature = "loom", loom)))]
pub mod thread {
    //! Standard library thread primitives.

    pub use std::thread::{spawn, yield_now, Builder, JoinHandle};
}

#[cfg(all(feature = "loom", loom))]
mod primitives {
    use core::time::Duration;
    use std::sync::PoisonError;

    pub use loom::sync::{Arc, MutexGuard};

    /// Loom mutex with a `parking_lot`-style infallible `lock`.
    pub struct Mutex<T>(loom::sync::Mutex<T>);

    impl<T> Mutex<T> {
        /// Creates a new mutex holding `value`.
        pub fn new(value: T) -> Self {
            Self(loom::sync::Mutex::new(value))
        }

        /// Acquires the lock, ignoring poisoning.
        pub fn lock(&self) -> MutexGuard<'_, T> {
            self.0.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Loom condition variable with a by-value guard API.
    pub struct Condvar(loom::sync::Condvar);

    impl Condvar {
        /// Creates a new condition variable.
        pub fn new() -> Self {
            Self(loom::sync::Condvar::new())
        }

        /// Blocks until notified, returning the re-acquired guard.
        pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
            self.0.wait(guard).unwrap_or_else(PoisonError::into_inner)
        }

        /// Loom does not model time, so this is a plain `wait` that never times out.
        pub fn wait_timeout<'a, T>(
            &self,
            guard: MutexGuard<'a, T>,
            _timeout: Duration,
        ) -> (MutexGuard<'a, T>, bool) {
            (self.wait(guard), false)
        }

        /// Wakes one waiter.
        pub fn notify_one(&self) {
            self.0.notify_one();
        }

        /// Wakes every waiter.
        pub fn notify_all(&self) {
            self.0.notify_all();
        }
    }
}

#[cfg(not(all(feature = "loom", loom)))]
mod primitives {
    use core::time::Duration;

    pub use parking_lot::{Mutex, MutexGuard};
    pub use std::sync::Arc;

    /// `parking_lot` condition variable with a by-value guard API.
    #[derive(Debug, Default)]
    pub struct Condvar(parking_lot::Condvar);

    impl Condvar {
        /// Creates a new condition variable.
        pub const fn new() -> Self {
            Self(parking_lot::Condvar::new())
        }

        /// Blocks until notified, returning the re-acquired guard.
        #[inline]
        pub fn wait<'a, T>(&self, mut guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
            self.0.wait(&mut guard);
            guard
        }

        /// Blocks until notified or until `timeout` elapses.
        ///
        /// The returned flag is `true` when the wait timed out.
        #[inline]
        pub fn wait_timeout<'a, T>(
            &self,
            mut guard: MutexGuard<'a, T>,
            timeout: Duration,
        ) -> (MutexGuard<'a, T>, bool) {
            let timed_out = self.0.wait_for(&mut guard, timeout).timed_out();
            (guard, timed_out)
        }

        /// Wakes one waiter.
        #[inline]
        pub fn notify_one(&self) {
            self.0.notify_one();
        }

        /// Wakes every waiter.
        #[inline]
        pub fn notify_all(&self) {
            self.0.notify_all();
        }
    }
}

pub use primitives::{Arc, Condvar, Mutex, MutexGuard};

/// Thread-local storage that works with Loom.
///
/// Loom simulates many threads inside one OS thread, so it needs its own
/// `thread_local!` to give each simulated thread a fresh value.
#[macro_export]
#[doc(hidden)]
macro_rules! loom_thread_local {
    ($(#[$attr:meta])* $vis:vis static $name:ident: $ty:ty = $init:expr;) => {
        #[cfg(all(feature = "loom", loom))]
        loom::thread_local! {
            $(#[$attr])*
            $vis static $name: $ty = $init;
        }

        #[cfg(not(all(feature = "loom", loom)))]
        std::thread_local! {
            $(#[$attr])*
            $vis static $name: $ty = $init;
        }
    };
}
