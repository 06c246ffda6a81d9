//! End-to-End Reclamation Tests
//!
//! Each test tracks payload destruction with a drop counter and checks the
//! one property that matters for its handle kind: the allocation is freed
//! exactly once, by the party that is supposed to free it.

#![cfg(not(loom))]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_utils::thread;
use tenure::{Collector, Deferred, Owning, Shared};

const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Payload that counts how many times it has been dropped.
struct DropCounter {
    drops: Arc<AtomicUsize>,
}

impl DropCounter {
    fn new() -> (Self, Arc<AtomicUsize>) {
        let drops = Arc::new(AtomicUsize::new(0));
        (
            Self {
                drops: drops.clone(),
            },
            drops,
        )
    }
}

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Exclusive ownership
// ============================================================================

#[test]
fn transfer_leaves_source_empty_and_frees_once() {
    let (payload, drops) = DropCounter::new();
    let h1 = Owning::new(payload);
    let h2 = Owning::empty();
    let address = h1.get();

    assert!(h1.pass_ownership_to(&h2).is_none());
    assert!(h1.get().is_none());
    assert_eq!(h2.get(), address);

    drop(h1);
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    drop(h2);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn borrow_reads_absent_after_owner_disowns() {
    let (payload, drops) = DropCounter::new();
    let owner = Owning::new(payload);
    let view = owner.borrow();
    assert!(view.get().is_some());

    let taken = owner.disown();
    assert!(view.get().is_none());
    assert!(!view.is_live());
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    drop(taken);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn concurrent_transfers_keep_single_owner() {
    let (payload, drops) = DropCounter::new();
    let handles: Vec<Owning<DropCounter>> = (0..8).map(|_| Owning::empty()).collect();
    let _ = handles[0].claim(Box::new(payload));

    thread::scope(|s| {
        for worker in 0..8 {
            let handles = &handles;
            s.spawn(move |_| {
                for round in 0..200 {
                    let from = (worker + round) % handles.len();
                    let to = (from + 1) % handles.len();
                    let displaced = handles[from].pass_ownership_to(&handles[to]);
                    assert!(displaced.is_none(), "transfer displaced a live allocation");
                }
            });
        }
    })
    .unwrap();

    // Transfers only ever target an empty slot when there is one token, so
    // exactly one handle still holds it.
    let owners = handles.iter().filter(|h| !h.is_empty()).count();
    assert_eq!(owners, 1);
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    drop(handles);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn borrow_with_blocks_concurrent_free() {
    let owner = Owning::new(vec![7u8; 1024]);

    thread::scope(|s| {
        let view = owner.borrow();
        s.spawn(move |_| {
            for _ in 0..1_000 {
                if let Some(sum) = view.with(|v| v.iter().map(|&b| b as usize).sum::<usize>()) {
                    assert_eq!(sum, 7 * 1024);
                }
            }
        });
        s.spawn(|_| {
            std::thread::yield_now();
            owner.free();
        });
    })
    .unwrap();

    assert!(owner.is_empty());
}

// ============================================================================
// Synchronous shared reclamation
// ============================================================================

#[test]
fn shared_frees_on_last_release() {
    let (payload, drops) = DropCounter::new();
    let s1 = Shared::new(payload);
    assert_eq!(s1.count(), 1);

    let s2 = s1.clone();
    assert_eq!(s2.count(), 2);

    drop(s1);
    assert_eq!(s2.count(), 1);
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    drop(s2);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn shared_destruction_order_does_not_matter() {
    for reverse in [false, true] {
        let (payload, drops) = DropCounter::new();
        let root = Shared::new(payload);
        let mut handles: Vec<_> = (0..10).map(|_| root.clone()).collect();
        handles.push(root);
        if reverse {
            handles.reverse();
        }

        while let Some(handle) = handles.pop() {
            let last = handles.is_empty();
            drop(handle);
            assert_eq!(drops.load(Ordering::SeqCst), usize::from(last));
        }
    }
}

#[test]
fn hundred_threads_clone_and_drop_shared() {
    let (payload, drops) = DropCounter::new();
    let mut root = Shared::new(payload);

    thread::scope(|s| {
        for _ in 0..100 {
            let root = &root;
            s.spawn(move |_| {
                let local = root.clone();
                assert!(local.get().is_some());
                drop(local);
            });
        }
    })
    .unwrap();

    assert_eq!(root.count(), 1);
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    root.disown();
    assert_eq!(root.count(), 0);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn concurrent_last_releases_free_exactly_once() {
    for _ in 0..50 {
        let (payload, drops) = DropCounter::new();
        let root = Shared::new(payload);
        let handles: Vec<_> = (0..8).map(|_| root.clone()).collect();
        drop(root);

        thread::scope(|s| {
            for handle in handles {
                s.spawn(move |_| drop(handle));
            }
        })
        .unwrap();

        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}

// ============================================================================
// Collector-deferred reclamation
// ============================================================================

#[test]
fn deferred_waits_for_collector() {
    let collector = Collector::new();
    let (payload, drops) = DropCounter::new();

    let g1 = Deferred::new_in(payload, &collector);
    let g2 = g1.clone();
    drop(g1);
    drop(g2);

    // Nothing runs the queue yet, so the last release cannot have freed.
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    assert_eq!(collector.pending(), 1);

    collector.start().unwrap();
    collector.wait_idle(IDLE_TIMEOUT).unwrap();
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    let stats = collector.stats();
    assert_eq!(stats.retired, 1);
    assert_eq!(stats.reclaimed, 1);
    collector.stop();
}

#[test]
fn deferred_release_never_frees_on_caller() {
    let collector = Collector::new();
    let (payload, drops) = DropCounter::new();
    let root = Deferred::new_in(payload, &collector);

    thread::scope(|s| {
        for _ in 0..16 {
            let root = &root;
            s.spawn(move |_| {
                for _ in 0..50 {
                    drop(root.clone());
                }
            });
        }
    })
    .unwrap();

    drop(root);
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    assert_eq!(collector.stats().retired, 1);

    collector.stop();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn deferred_many_blocks_with_running_collector() {
    let collector = Collector::new();
    collector.start().unwrap();
    let drops = Arc::new(AtomicUsize::new(0));

    thread::scope(|s| {
        for _ in 0..8 {
            let collector = &collector;
            let drops = &drops;
            s.spawn(move |_| {
                for _ in 0..100 {
                    let handle = Deferred::new_in(
                        DropCounter {
                            drops: Arc::clone(drops),
                        },
                        collector,
                    );
                    let copy = handle.clone();
                    drop(handle);
                    drop(copy);
                }
            });
        }
    })
    .unwrap();

    collector.wait_idle(IDLE_TIMEOUT).unwrap();
    assert_eq!(drops.load(Ordering::SeqCst), 800);

    let stats = collector.stats();
    assert_eq!(stats.retired, 800);
    assert_eq!(stats.reclaimed, 800);
    assert_eq!(stats.pending, 0);
    collector.stop();
}

#[test]
fn global_collector_reclaims_default_handles() {
    let (payload, drops) = DropCounter::new();
    let handle = Deferred::new(payload);
    assert!(handle.collector().is_running());

    drop(handle);
    Collector::global().wait_idle(IDLE_TIMEOUT).unwrap();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}
