//! Tenure: Owning, Borrowing, Reference-Counted and Collector-Deferred Handles
//!
//! This crate provides a small family of pointer-like handles over heap
//! allocations, each with a different answer to "who frees this, and when":
//!
//! | Handle           | Frees when                                                  |
//! |------------------|-------------------------------------------------------------|
//! | [`Owning`]       | dropped or freed while holding the allocation               |
//! | [`Borrowing`]    | never; reports `None` once its owner lets go                |
//! | [`Shared`]       | synchronously, on the release that takes the count to zero  |
//! | [`Deferred`]     | later, on the [`Collector`] worker, after being queued      |
//!
//! # Architecture
//!
//! - [`slot`]: the lock-guarded address cell every handle is built on
//! - [`owned`]: exclusive ownership and non-owning borrows
//! - [`counted`]: the counted block and the two reference-counted front-ends
//! - [`collector`]: the pending-deletion queue and its worker thread
//! - [`sync`]: `parking_lot` primitives, swapped for Loom's under `--cfg loom`
//!
//! # Reclamation Invariant
//!
//! ```text
//! ∀ block: count(block) = |{ h : h is a live counting handle on block }|
//! ∀ block: reclaimed(block) ⟹ exactly one release observed count 1 → 0
//! ```
//!
//! Every failure mode the handles can express is the absent state: reading an
//! empty or dangling handle returns `None`, and freeing or disowning an empty
//! handle is a no-op. [`Error`] only covers the collector's thread lifecycle.
//!
//! # Example
//!
//! ```rust
//! use tenure::{Owning, Shared};
//!
//! let owner = Owning::new(String::from("exclusive"));
//! let view = owner.borrow();
//! assert_eq!(view.with(|s| s.len()), Some(9));
//!
//! let shared = Shared::new(5u32);
//! let again = shared.clone();
//! assert_eq!(again.count(), 2);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]

// Conditional synchronization primitives for Loom integration
pub mod sync;

pub mod collector;
pub mod counted;
pub mod owned;
pub mod slot;

pub use collector::{Collector, CollectorConfig, CollectorStats};
pub use counted::{Deferred, Shared};
pub use owned::{Borrowing, Owning};
pub use slot::Slot;

use core::time::Duration;

/// Error types for the tenure crate
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The collector worker thread could not be spawned
    #[error("failed to spawn collector worker: {0}")]
    Spawn(#[from] std::io::Error),
    /// The collector did not go idle in time
    #[error("collector still had {pending} block(s) outstanding after {waited:?}")]
    Timeout {
        /// Blocks queued or mid-reclaim when the wait gave up
        pending: usize,
        /// How long the caller waited
        waited: Duration,
    },
}

/// Result type for tenure operations
pub type Result<T> = core::result::Result<T, Error>;

/// Compile-time configuration constants
pub mod config {
    /// Default name of the collector worker thread
    pub const COLLECTOR_THREAD_NAME: &str = "tenure-collector";

    /// Pending-deletion queue slots allocated up front
    pub const INITIAL_QUEUE_CAPACITY: usize = 64;
}
