//! One-shot cancellation signals.
//!
//! A [`CancelToken`] is a cooperative flag an activity can attach to any
//! channel request or alternation. Cancelling the token withdraws every
//! live offer watching it, failing those requests with `Cancelled`.
//! A request whose offer already committed is unaffected: the race between
//! cancellation and a commit is decided by the offer's atomic state, and
//! the commit wins.
//!
//! Tokens are cheap to clone; all clones observe the same flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::error::ErrorKind;
use crate::offer::Offer;

/// A clonable, one-shot cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    watchers: Mutex<Vec<Weak<Offer>>>,
}

impl CancelToken {
    /// Creates a fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once [`CancelToken::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Fires the signal. Every live offer watching this token is withdrawn
    /// with `Cancelled`; offers that already committed ignore it. Calling
    /// cancel again is a no-op.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let watchers = {
            let mut guard = self
                .inner
                .watchers
                .lock()
                .expect("cancel watchers lock poisoned");
            std::mem::take(&mut *guard)
        };
        for weak in watchers {
            if let Some(offer) = weak.upgrade() {
                offer.withdraw(ErrorKind::Cancelled);
            }
        }
        tracing::trace!("cancel token fired");
    }

    /// Registers an offer for withdrawal when the token fires. If the token
    /// already fired, the offer is withdrawn on the spot.
    pub(crate) fn watch(&self, offer: &Arc<Offer>) {
        if self.is_cancelled() {
            offer.withdraw(ErrorKind::Cancelled);
            return;
        }
        {
            let mut watchers = self
                .inner
                .watchers
                .lock()
                .expect("cancel watchers lock poisoned");
            watchers.retain(|w| w.strong_count() > 0);
            watchers.push(Arc::downgrade(offer));
        }
        // The flag may have flipped while we were registering.
        if self.is_cancelled() {
            offer.withdraw(ErrorKind::Cancelled);
        }
    }
}
