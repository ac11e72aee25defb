//! One-shot completion slots.
//!
//! Every channel operation resolves through a completer: a single-use slot
//! that is fulfilled exactly once, by exactly one of a pairing, a timeout,
//! a cancellation, a retirement, or an overflow eviction. The slot has two
//! handles:
//!
//! ```text
//!   completion::<T>() ──► (Completer<T>, Pending<T>)
//!
//!   Completer ─ complete(Ok(v) | Err(e)) ─► slot   (first caller wins)
//!   Pending   ─ wait() / .await          ◄─ slot
//! ```
//!
//! `Pending` supports both blocking waits (condvar) and `Future` polling
//! (stored waker); the fulfilling side wakes whichever is parked. The slot
//! never exposes the payload type to the fulfilling machinery: erased alt
//! payloads cross as `Box<dyn Any + Send>` inside the value itself.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Waker};

use crate::error::{Error, Result};

#[derive(Debug)]
struct Slot<T> {
    outcome: Option<Result<T>>,
    taken: bool,
    waker: Option<Waker>,
}

#[derive(Debug)]
struct Shared<T> {
    slot: Mutex<Slot<T>>,
    cond: Condvar,
}

/// Creates a linked completer/pending pair.
#[must_use]
pub fn completion<T>() -> (Completer<T>, Pending<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot {
            outcome: None,
            taken: false,
            waker: None,
        }),
        cond: Condvar::new(),
    });
    (
        Completer {
            shared: Arc::clone(&shared),
        },
        Pending { shared },
    )
}

/// The fulfilling half of a completion slot.
///
/// Cloneable: a request queued on several channels shares one completer,
/// and only the first `complete` call lands.
#[derive(Debug)]
pub struct Completer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Completer<T> {
    /// Posts an outcome into the slot. Returns true if this call resolved
    /// the slot, false if it was already resolved (or already consumed).
    pub fn complete(&self, outcome: Result<T>) -> bool {
        let mut slot = self.shared.slot.lock().expect("completion lock poisoned");
        if slot.taken || slot.outcome.is_some() {
            return false;
        }
        slot.outcome = Some(outcome);
        let waker = slot.waker.take();
        drop(slot);
        self.shared.cond.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Posts a success value. See [`Completer::complete`].
    pub fn fulfil(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    /// Posts a failure. See [`Completer::complete`].
    pub fn fail(&self, error: Error) -> bool {
        self.complete(Err(error))
    }

    /// Returns true if the slot already holds (or handed out) an outcome.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        let slot = self.shared.slot.lock().expect("completion lock poisoned");
        slot.taken || slot.outcome.is_some()
    }
}

/// The waiting half of a completion slot.
#[derive(Debug)]
pub struct Pending<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Pending<T> {
    /// Blocks the calling thread until the slot resolves.
    pub fn wait(self) -> Result<T> {
        let mut slot = self.shared.slot.lock().expect("completion lock poisoned");
        loop {
            if let Some(outcome) = slot.outcome.take() {
                slot.taken = true;
                return outcome;
            }
            slot = self
                .shared
                .cond
                .wait(slot)
                .expect("completion lock poisoned");
        }
    }

    /// Takes the outcome if the slot has resolved.
    pub fn try_take(&mut self) -> Option<Result<T>> {
        let mut slot = self.shared.slot.lock().expect("completion lock poisoned");
        let outcome = slot.outcome.take();
        if outcome.is_some() {
            slot.taken = true;
        }
        outcome
    }

    /// Returns true if the slot has resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        let slot = self.shared.slot.lock().expect("completion lock poisoned");
        slot.taken || slot.outcome.is_some()
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.shared.slot.lock().expect("completion lock poisoned");
        if let Some(outcome) = slot.outcome.take() {
            slot.taken = true;
            return Poll::Ready(outcome);
        }
        slot.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::task::Wake;

    fn block_on<F: Future>(f: F) -> F::Output {
        struct NoopWaker;
        impl Wake for NoopWaker {
            fn wake(self: Arc<Self>) {}
        }
        let waker = Waker::from(Arc::new(NoopWaker));
        let mut cx = Context::from_waker(&waker);
        let mut pinned = Box::pin(f);
        loop {
            match pinned.as_mut().poll(&mut cx) {
                Poll::Ready(v) => return v,
                Poll::Pending => std::thread::yield_now(),
            }
        }
    }

    #[test]
    fn fulfil_then_wait() {
        let (tx, rx) = completion::<i32>();
        assert!(tx.fulfil(42));
        assert_eq!(rx.wait().expect("slot fulfilled"), 42);
    }

    #[test]
    fn first_completion_wins() {
        let (tx, rx) = completion::<i32>();
        assert!(tx.fulfil(1));
        assert!(!tx.fulfil(2));
        assert!(!tx.fail(Error::new(ErrorKind::Timeout)));
        assert_eq!(rx.wait().expect("slot fulfilled"), 1);
    }

    #[test]
    fn failure_propagates() {
        let (tx, rx) = completion::<i32>();
        assert!(tx.fail(Error::new(ErrorKind::Retired)));
        let err = rx.wait().expect_err("slot failed");
        assert_eq!(err.kind(), ErrorKind::Retired);
    }

    #[test]
    fn wait_blocks_until_fulfilled() {
        let (tx, rx) = completion::<i32>();
        let handle = std::thread::spawn(move || rx.wait());
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(tx.fulfil(7));
        let value = handle.join().expect("waiter panicked");
        assert_eq!(value.expect("slot fulfilled"), 7);
    }

    #[test]
    fn try_take_consumes_the_outcome() {
        let (tx, mut rx) = completion::<i32>();
        assert!(rx.try_take().is_none());
        tx.fulfil(3);
        let taken = rx.try_take().expect("outcome present");
        assert_eq!(taken.expect("ok"), 3);
        assert!(rx.try_take().is_none());
        // The slot is consumed; a late completion is a no-op.
        assert!(!tx.fulfil(4));
    }

    #[test]
    fn future_resolves_when_fulfilled() {
        let (tx, rx) = completion::<i32>();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            tx.fulfil(11);
        });
        let value = block_on(rx);
        assert_eq!(value.expect("slot fulfilled"), 11);
        handle.join().expect("fulfiller panicked");
    }

    #[test]
    fn is_resolved_tracks_state() {
        let (tx, rx) = completion::<i32>();
        assert!(!tx.is_resolved());
        assert!(!rx.is_resolved());
        tx.fulfil(1);
        assert!(tx.is_resolved());
        assert!(rx.is_resolved());
    }
}
