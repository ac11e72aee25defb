//! Deadline driver.
//!
//! One timer registration exists per alt (single requests use a trivial
//! single-candidate offer, so they also register exactly one). The driver
//! keeps a min-heap of `(instant, offer)` entries on a dedicated thread;
//! when an entry expires the driver withdraws the offer with `Timeout`.
//! Offers that committed first ignore the withdrawal, which is how the
//! deadline-versus-pairing race is resolved.
//!
//! Registrations hold the offer weakly: an alt that resolved and dropped
//! its offer costs nothing but a stale heap entry that is skipped at
//! expiry.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, Weak};
use std::time::Instant;

use crate::error::ErrorKind;
use crate::offer::Offer;
use crate::time::Deadline;

struct Entry {
    at: Instant,
    seq: u64,
    offer: Weak<Offer>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest deadline.
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct Driver {
    heap: Mutex<BinaryHeap<Entry>>,
    cond: Condvar,
    seq: AtomicU64,
}

impl Driver {
    fn register(&self, at: Instant, offer: Weak<Offer>) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.heap
            .lock()
            .expect("timer heap lock poisoned")
            .push(Entry { at, seq, offer });
        self.cond.notify_one();
    }

    fn run(&self) {
        let mut heap = self.heap.lock().expect("timer heap lock poisoned");
        loop {
            let now = Instant::now();
            let mut due = Vec::new();
            while heap.peek().is_some_and(|e| e.at <= now) {
                due.push(heap.pop().expect("peeked entry present"));
            }
            if !due.is_empty() {
                drop(heap);
                for entry in due {
                    if let Some(offer) = entry.offer.upgrade() {
                        if offer.withdraw(ErrorKind::Timeout) {
                            tracing::trace!(seq = entry.seq, "deadline expired, offer withdrawn");
                        }
                    }
                }
                heap = self.heap.lock().expect("timer heap lock poisoned");
                continue;
            }
            heap = match heap.peek() {
                Some(entry) => {
                    let wait = entry.at.saturating_duration_since(now);
                    self.cond
                        .wait_timeout(heap, wait)
                        .expect("timer heap lock poisoned")
                        .0
                }
                None => self.cond.wait(heap).expect("timer heap lock poisoned"),
            };
        }
    }
}

fn driver() -> &'static Driver {
    static DRIVER: OnceLock<&'static Driver> = OnceLock::new();
    *DRIVER.get_or_init(|| {
        let driver: &'static Driver = Box::leak(Box::new(Driver {
            heap: Mutex::new(BinaryHeap::new()),
            cond: Condvar::new(),
            seq: AtomicU64::new(0),
        }));
        std::thread::Builder::new()
            .name("alting-timer".into())
            .spawn(move || driver.run())
            .expect("failed to spawn timer thread");
        driver
    })
}

/// Registers `offer` for withdrawal when `deadline` passes. A `Never`
/// deadline registers nothing.
pub(crate) fn schedule(deadline: Deadline, offer: &Arc<Offer>) {
    if let Deadline::At(at) = deadline {
        driver().register(at, Arc::downgrade(offer));
    }
}
