//! Handle for a posted channel operation.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::completion::Pending;
use crate::error::Result;

/// An in-flight read or write.
///
/// The request was already posted when the `Op` was handed out; the handle
/// only waits for the outcome. It can be blocked on with [`Op::wait`] or
/// awaited as a `Future`. When the handle resolves or is dropped, any queue
/// entries the request still holds are rescinded, so abandoned deadlines
/// and cancellations leave nothing behind on the channel.
#[must_use = "an Op does nothing until waited or awaited"]
#[derive(Debug)]
pub struct Op<T> {
    pending: Option<Pending<T>>,
    rescind: Option<Rescind>,
}

struct Rescind(Box<dyn FnOnce() + Send>);

impl std::fmt::Debug for Rescind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Rescind")
    }
}

impl<T> Op<T> {
    pub(crate) fn new(pending: Pending<T>, rescind: Option<Box<dyn FnOnce() + Send>>) -> Self {
        Self {
            pending: Some(pending),
            rescind: rescind.map(Rescind),
        }
    }

    /// Blocks the calling thread until the operation resolves.
    pub fn wait(mut self) -> Result<T> {
        let pending = self.pending.take().expect("op polled after completion");
        let outcome = pending.wait();
        self.cleanup();
        outcome
    }

    /// Returns true once the operation has resolved (the outcome may still
    /// need to be collected with `wait`/`await`).
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.pending.as_ref().map_or(true, Pending::is_resolved)
    }

    fn cleanup(&mut self) {
        if let Some(Rescind(run)) = self.rescind.take() {
            run();
        }
    }
}

impl<T> Future for Op<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let pending = this.pending.as_mut().expect("op polled after completion");
        match Pin::new(pending).poll(cx) {
            Poll::Ready(outcome) => {
                this.pending = None;
                this.cleanup();
                Poll::Ready(outcome)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for Op<T> {
    fn drop(&mut self) {
        self.cleanup();
    }
}
