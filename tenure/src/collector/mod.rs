//! Background Reclamation Collector
//!
//! The collector owns the pending-deletion queue for [`Deferred`] handles and
//! one worker thread that drains it.
//!
//! # Algorithm
//!
//! ```text
//! 1. A Deferred release takes a block's count to zero
//! 2. That release pushes the block onto the back of the queue and signals
//! 3. The worker wakes, pops the front entry under the queue lock
//! 4. The lock is released, then payload and block record are freed
//! 5. With the queue empty the worker blocks until the next signal
//! 6. stop() retires the worker's generation; it exits once the queue is empty
//! ```
//!
//! Destructors run outside the queue lock, so a payload whose drop releases
//! other deferred handles simply queues more work behind itself.
//!
//! # Lifecycle
//!
//! A collector starts stopped. Blocks retired while it is stopped wait in the
//! queue until [`Collector::start`], [`Collector::collect`],
//! [`Collector::stop`], or the collector's own drop reclaims them. Dropping
//! the last `Arc<Collector>` stops the worker and drains the queue.
//!
//! # Ownership
//!
//! Every [`Deferred`] holds an `Arc<Collector>`. The worker thread only holds
//! the queue state, so it never keeps the collector itself alive.
//!
//! A queued payload that owns a `Deferred` bound to the same collector also
//! holds one of those `Arc`s. On a stopped collector that reference lives
//! inside the collector's own queue, so the collector is never dropped and
//! the entry is never freed. Call [`Collector::stop`] or
//! [`Collector::collect`] before letting go of such a collector; a running
//! worker frees these entries on its own.
//!
//! [`Deferred`]: crate::Deferred

mod stats;

pub use stats::CollectorStats;

use core::fmt;
use core::ptr::NonNull;
use core::time::Duration;
use std::cell::Cell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::LazyLock;
use std::time::Instant;

use crate::config;
use crate::counted::CountedBlock;
use crate::sync::atomic::{AtomicBool, Ordering};
use crate::sync::thread::{Builder, JoinHandle};
use crate::sync::{Arc, Condvar, Mutex};
use crate::{Error, Result};
use stats::Counters;

/// Type-erased reclaim function, monomorphized per payload type.
type ReclaimFn = unsafe fn(*mut u8);

/// A dead block waiting in the queue.
struct Retired {
    block: *mut u8,
    reclaim: ReclaimFn,
}

// SAFETY: `Retired::new` only accepts blocks of `T: Send`, and a dead block is
// owned by the queue alone.
unsafe impl Send for Retired {}

impl Retired {
    fn new<T: Send + 'static>(block: NonNull<CountedBlock<T>>) -> Self {
        Self {
            block: block.as_ptr().cast(),
            reclaim: reclaim_block::<T>,
        }
    }

    /// # Safety
    ///
    /// Must be called at most once per retired block.
    unsafe fn reclaim(self) {
        // SAFETY: `reclaim` was instantiated for the block's real type.
        unsafe { (self.reclaim)(self.block) };
    }
}

unsafe fn reclaim_block<T>(ptr: *mut u8) {
    // SAFETY: ptr was created from a NonNull<CountedBlock<T>> in Retired::new.
    unsafe { CountedBlock::reclaim(NonNull::new_unchecked(ptr.cast::<CountedBlock<T>>())) };
}

struct Queue {
    entries: VecDeque<Retired>,
    /// Entries popped but not yet freed.
    in_flight: usize,
    /// Bumped by every start and stop. A worker whose generation is stale
    /// drains what is left and exits.
    generation: u64,
}

impl Queue {
    fn is_idle(&self) -> bool {
        self.entries.is_empty() && self.in_flight == 0
    }
}

/// Settings for a [`Collector`]'s worker thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    /// Name given to the worker thread.
    pub thread_name: String,
    /// Worker stack size in bytes, or the platform default.
    pub stack_size: Option<usize>,
}

impl CollectorConfig {
    /// Sets the worker thread name.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Sets the worker stack size.
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            thread_name: config::COLLECTOR_THREAD_NAME.to_owned(),
            stack_size: None,
        }
    }
}

crate::loom_thread_local! {
    /// Address of the queue state the current thread is the worker for, or 0.
    static CURRENT_WORKER: Cell<usize> = Cell::new(0);
}

static GLOBAL: LazyLock<Arc<Collector>> = LazyLock::new(|| {
    let collector = Collector::new();
    if let Err(err) = collector.start() {
        tracing::error!(%err, "global collector did not start; deferred blocks will queue");
    }
    collector
});

/// Queue state shared between a [`Collector`] and its worker thread.
struct State {
    queue: Mutex<Queue>,
    /// Signalled on retire and on shutdown.
    work: Condvar,
    /// Signalled when the queue becomes idle.
    idle: Condvar,
    counters: Counters,
}

impl State {
    fn new() -> Self {
        Self {
            queue: Mutex::new(Queue {
                entries: VecDeque::with_capacity(config::INITIAL_QUEUE_CAPACITY),
                in_flight: 0,
                generation: 0,
            }),
            work: Condvar::new(),
            idle: Condvar::new(),
            counters: Counters::new(),
        }
    }

    fn retire(&self, entry: Retired) {
        let pending = {
            let mut queue = self.queue.lock();
            self.counters.record_retire();
            queue.entries.push_back(entry);
            queue.entries.len()
        };
        self.work.notify_one();
        tracing::trace!(pending, "block retired");
    }

    fn pending(&self) -> usize {
        self.queue.lock().entries.len()
    }

    fn collect(&self) -> usize {
        let mut reclaimed = 0;
        loop {
            let entry = {
                let mut queue = self.queue.lock();
                let Some(entry) = queue.entries.pop_front() else {
                    break;
                };
                queue.in_flight += 1;
                entry
            };
            self.reclaim(entry);
            reclaimed += 1;
        }
        reclaimed
    }

    /// Starts a new worker generation, retiring the previous one.
    fn advance_generation(&self) -> u64 {
        let mut queue = self.queue.lock();
        queue.generation += 1;
        queue.generation
    }

    /// Worker loop for one generation.
    fn run(&self, generation: u64) {
        CURRENT_WORKER.with(|current| current.set(self.address()));
        tracing::trace!("collector worker running");

        loop {
            let entry = {
                let mut queue = self.queue.lock();
                while queue.entries.is_empty() && queue.generation == generation {
                    queue = self.work.wait(queue);
                }
                // Empty here means this generation was stopped and everything
                // queued has been freed.
                let Some(entry) = queue.entries.pop_front() else {
                    break;
                };
                queue.in_flight += 1;
                entry
            };
            self.reclaim(entry);
        }

        CURRENT_WORKER.with(|current| current.set(0));
        tracing::trace!("collector worker exiting");
    }

    /// Frees one popped entry and settles the in-flight bookkeeping.
    ///
    /// A panicking destructor is logged and does not take the worker down.
    fn reclaim(&self, entry: Retired) {
        // SAFETY: the entry was popped from the queue, so nobody else holds it.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| unsafe { entry.reclaim() }));
        if outcome.is_err() {
            tracing::error!("payload destructor panicked during reclamation");
        }
        self.counters.record_reclaim();

        let mut queue = self.queue.lock();
        queue.in_flight -= 1;
        if queue.is_idle() {
            self.idle.notify_all();
        }
    }

    fn address(&self) -> usize {
        self as *const Self as usize
    }

    fn is_current_worker(&self) -> bool {
        CURRENT_WORKER.with(|current| current.get() == self.address())
    }
}

/// The reclamation authority for [`Deferred`](crate::Deferred) handles.
///
/// # Thread Safety
///
/// The queue has a single lock. Any thread may retire into it; the worker
/// and [`Collector::collect`] are the only consumers, and each entry is popped
/// exactly once.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use tenure::{Collector, Deferred};
///
/// let collector = Collector::new();
/// collector.start()?;
///
/// drop(Deferred::new_in([0u8; 64], &collector));
/// collector.wait_idle(Duration::from_secs(5))?;
///
/// collector.stop();
/// assert_eq!(collector.stats().reclaimed, 1);
/// # Ok::<(), tenure::Error>(())
/// ```
pub struct Collector {
    config: CollectorConfig,
    state: Arc<State>,
    worker: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl Collector {
    /// Creates a stopped collector with default settings.
    pub fn new() -> Arc<Self> {
        Self::with_config(CollectorConfig::default())
    }

    /// Creates a stopped collector.
    pub fn with_config(settings: CollectorConfig) -> Arc<Self> {
        Arc::new(Self {
            config: settings,
            state: Arc::new(State::new()),
            worker: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    /// Returns the process-wide collector, starting it on first use.
    ///
    /// If the worker cannot be spawned the failure is logged and the
    /// collector stays stopped; calling [`Collector::start`] retries.
    ///
    /// Statics are never dropped, so blocks still queued here when `main`
    /// returns are not reclaimed. Call `Collector::global().stop()` before
    /// exiting if their destructors must run.
    pub fn global() -> &'static Arc<Collector> {
        &GLOBAL
    }

    /// Spawns the worker thread. Does nothing if it is already running.
    ///
    /// # Errors
    ///
    /// [`Error::Spawn`] if the operating system refuses the thread.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        let generation = self.state.advance_generation();

        let mut builder = Builder::new().name(self.config.thread_name.clone());
        if let Some(bytes) = self.config.stack_size {
            builder = builder.stack_size(bytes);
        }
        let state = Arc::clone(&self.state);
        *worker = Some(builder.spawn(move || state.run(generation))?);

        self.running.store(true, Ordering::SeqCst);
        tracing::debug!(thread = %self.config.thread_name, "collector started");
        Ok(())
    }

    /// Stops the worker after it has drained the queue.
    ///
    /// Blocks until the worker exits, then reclaims anything retired while it
    /// was shutting down. On a collector that is not running this drains the
    /// queue on the calling thread. When called from a destructor running on
    /// the worker itself, the worker finishes the drain on its own and this
    /// returns immediately.
    pub fn stop(&self) {
        let handle = {
            let mut worker = self.worker.lock();
            let handle = worker.take();
            if handle.is_some() {
                self.state.advance_generation();
                self.running.store(false, Ordering::SeqCst);
            }
            handle
        };
        let Some(handle) = handle else {
            let drained = self.state.collect();
            if drained > 0 {
                tracing::debug!(drained, "collector drained while stopped");
            }
            return;
        };
        self.state.work.notify_all();

        if self.state.is_current_worker() {
            drop(handle);
            return;
        }

        if handle.join().is_err() {
            tracing::error!("collector worker panicked");
        }
        let stragglers = self.state.collect();
        tracing::debug!(stragglers, "collector stopped");
    }

    /// Returns `true` while the worker thread is running.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns the number of blocks waiting in the queue.
    #[inline]
    pub fn pending(&self) -> usize {
        self.state.pending()
    }

    /// Returns a snapshot of the collector's counters.
    pub fn stats(&self) -> CollectorStats {
        let pending = self.pending();
        self.state.counters.snapshot(pending)
    }

    /// Drains the queue on the calling thread, oldest first.
    ///
    /// Returns the number of blocks reclaimed. Safe to call while the worker
    /// runs; each block is still freed exactly once.
    pub fn collect(&self) -> usize {
        let reclaimed = self.state.collect();
        if reclaimed > 0 {
            tracing::trace!(reclaimed, "collected on caller thread");
        }
        reclaimed
    }

    /// Blocks until the queue is empty and no block is mid-reclaim.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] if that does not happen within `timeout`, for
    /// example because the collector is stopped.
    pub fn wait_idle(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now().checked_add(timeout);
        let mut queue = self.state.queue.lock();
        while !queue.is_idle() {
            match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(Error::Timeout {
                            pending: queue.entries.len() + queue.in_flight,
                            waited: timeout,
                        });
                    }
                    queue = self.state.idle.wait_timeout(queue, remaining).0;
                }
                None => queue = self.state.idle.wait(queue),
            }
        }
        Ok(())
    }

    /// Queues a dead block for reclamation.
    ///
    /// # Safety
    ///
    /// `block`'s count must have reached zero and the caller must be the
    /// single releaser that observed it.
    pub(crate) unsafe fn retire<T: Send + 'static>(&self, block: NonNull<CountedBlock<T>>) {
        self.state.retire(Retired::new(block));
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        // Joins a running worker after its drain, or drains here.
        self.stop();
    }
}

impl fmt::Debug for Collector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish()
    }
}


#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::Deferred;
    use std::sync::atomic::AtomicUsize;

    struct Tracked(std::sync::Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Records the order payloads are dropped in.
    struct Ordered(u32, std::sync::Arc<parking_lot::Mutex<Vec<u32>>>);

    impl Drop for Ordered {
        fn drop(&mut self) {
            self.1.lock().push(self.0);
        }
    }

    #[test]
    fn test_collector_starts_stopped() {
        let collector = Collector::new();
        assert!(!collector.is_running());
        assert_eq!(collector.pending(), 0);
        assert_eq!(collector.stats(), CollectorStats::default());
    }

    #[test]
    fn test_start_is_idempotent() {
        let collector = Collector::new();
        collector.start().unwrap();
        collector.start().unwrap();
        assert!(collector.is_running());

        collector.stop();
        assert!(!collector.is_running());
    }

    #[test]
    fn test_collect_is_fifo() {
        let collector = Collector::new();
        let order = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));

        for id in 0..5 {
            drop(Deferred::new_in(Ordered(id, order.clone()), &collector));
        }
        assert_eq!(collector.pending(), 5);
        assert_eq!(collector.collect(), 5);
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_worker_drains_in_fifo_order() {
        let collector = Collector::new();
        let order = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));

        for id in 0..16 {
            drop(Deferred::new_in(Ordered(id, order.clone()), &collector));
        }
        collector.start().unwrap();
        collector.wait_idle(Duration::from_secs(5)).unwrap();
        collector.stop();

        assert_eq!(*order.lock(), (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn test_stop_drains_queue() {
        let collector = Collector::new();
        let drops = std::sync::Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            drop(Deferred::new_in(Tracked(drops.clone()), &collector));
        }
        collector.stop();

        assert_eq!(drops.load(Ordering::SeqCst), 8);
        assert_eq!(collector.pending(), 0);
    }

    #[test]
    fn test_wait_idle_times_out_when_stopped() {
        let collector = Collector::new();
        drop(Deferred::new_in(1u8, &collector));

        let err = collector.wait_idle(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, Error::Timeout { pending: 1, .. }));
        collector.collect();
    }

    #[test]
    fn test_drop_reclaims_leftovers() {
        let drops = std::sync::Arc::new(AtomicUsize::new(0));
        {
            let collector = Collector::new();
            drop(Deferred::new_in(Tracked(drops.clone()), &collector));
            assert_eq!(drops.load(Ordering::SeqCst), 0);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_nested_deferred_payload_is_requeued() {
        let collector = Collector::new();
        let drops = std::sync::Arc::new(AtomicUsize::new(0));

        let inner = Deferred::new_in(Tracked(drops.clone()), &collector);
        drop(Deferred::new_in(inner, &collector));

        // Freeing the outer payload releases the inner handle, which queues.
        assert_eq!(collector.collect(), 2);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_restart_after_stop() {
        let collector = Collector::new();
        collector.start().unwrap();
        collector.stop();
        collector.start().unwrap();

        drop(Deferred::new_in(3u16, &collector));
        collector.wait_idle(Duration::from_secs(5)).unwrap();
        collector.stop();
        assert_eq!(collector.stats().reclaimed, 1);
    }

    #[test]
    fn test_custom_thread_name() {
        let config = CollectorConfig::default()
            .with_thread_name("reaper")
            .with_stack_size(256 * 1024);
        let collector = Collector::with_config(config);
        collector.start().unwrap();
        collector.stop();
        assert_eq!(collector.config.thread_name, "reaper");
    }

    #[test]
    fn test_worker_does_not_keep_collector_alive() {
        let collector = Collector::new();
        collector.start().unwrap();
        assert_eq!(Arc::strong_count(&collector), 1);
        collector.stop();
    }

    #[test]
    fn test_drop_without_stop_joins_worker_and_drains() {
        let drops = std::sync::Arc::new(AtomicUsize::new(0));
        let collector = Collector::with_config(
            CollectorConfig::default().with_thread_name("tenure-drop-join"),
        );
        collector.start().unwrap();
        let state = Arc::clone(&collector.state);

        for _ in 0..32 {
            drop(Deferred::new_in(Tracked(drops.clone()), &collector));
        }
        drop(collector);

        // The joined worker released its share of the queue state.
        assert_eq!(Arc::strong_count(&state), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 32);
        assert_eq!(state.pending(), 0);
    }

    #[test]
    fn test_last_collector_handle_dropped_on_worker() {
        let drops = std::sync::Arc::new(AtomicUsize::new(0));
        let collector = Collector::new();
        collector.start().unwrap();
        let state = Arc::clone(&collector.state);

        // After this, the only `Arc<Collector>` left lives inside a payload,
        // so the collector is usually dropped by its own worker.
        let inner = Deferred::new_in(Tracked(drops.clone()), &collector);
        drop(collector);
        let bound = Arc::clone(inner.collector());
        drop(Deferred::new_in(inner, &bound));
        drop(bound);

        let deadline = Instant::now() + Duration::from_secs(5);
        while Arc::strong_count(&state) > 1 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(Arc::strong_count(&state), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(state.pending(), 0);
    }

    #[test]
    fn test_stop_breaks_self_referencing_payload() {
        let collector = Collector::new();
        let drops = std::sync::Arc::new(AtomicUsize::new(0));

        let inner = Deferred::new_in(Tracked(drops.clone()), &collector);
        drop(Deferred::new_in(inner, &collector));
        assert_eq!(Arc::strong_count(&collector), 2);

        collector.stop();
        assert_eq!(Arc::strong_count(&collector), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        drop(collector);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
