//! The channel core: queues, matchmaking, overflow, retirement.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use crate::alt::{Selection, SelectionKind};
use crate::cancel::CancelToken;
use crate::completion::{completion, Completer};
use crate::error::{Error, ErrorKind};
use crate::offer::{HoldResult, Offer};
use crate::registry::{RegistryError, Scope};
use crate::time::Deadline;
use crate::timer;

use super::op::Op;
use super::{ChannelId, Lifecycle, Overflow};

/// Error returned by [`Channel::try_read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryReadError {
    /// No value and no paired writer available right now.
    Empty,
    /// The channel is retiring or retired.
    Retired,
}

impl std::fmt::Display for TryReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "channel has nothing to read"),
            Self::Retired => write!(f, "reading from a retired channel"),
        }
    }
}

impl std::error::Error for TryReadError {}

/// Error returned by [`Channel::try_write`], carrying the value back.
#[derive(Debug, PartialEq, Eq)]
pub enum TryWriteError<T> {
    /// No free buffer slot and no paired reader available right now.
    Full(T),
    /// The channel is retiring or retired.
    Retired(T),
}

impl<T> std::fmt::Display for TryWriteError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full(_) => write!(f, "channel cannot accept a value right now"),
            Self::Retired(_) => write!(f, "writing to a retired channel"),
        }
    }
}

impl<T: std::fmt::Debug> std::error::Error for TryWriteError<T> {}

/// Non-mutating snapshot of a channel's queues and state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelProbe {
    /// Current lifecycle state.
    pub state: Lifecycle,
    /// Number of buffered values.
    pub buffered: usize,
    /// Number of queued readers.
    pub pending_readers: usize,
    /// Number of queued writers.
    pub pending_writers: usize,
}

/// A queued read request.
#[derive(Debug)]
struct ReadWaiter<T> {
    offer: Option<Arc<Offer>>,
    slot: ReadSlot<T>,
}

/// A queued write request, carrying its value.
#[derive(Debug)]
struct WriteWaiter<T> {
    value: T,
    offer: Option<Arc<Offer>>,
    slot: WriteSlot,
}

#[derive(Debug)]
enum ReadSlot<T> {
    Single(Completer<T>),
    Alt {
        completer: Completer<Selection>,
        index: usize,
    },
}

#[derive(Debug)]
enum WriteSlot {
    Single(Completer<()>),
    Alt {
        completer: Completer<Selection>,
        index: usize,
    },
}

/// Work produced under the channel lock, executed after it is released.
/// Commit hooks and completers are user-observable and must never run
/// while the lock is held.
enum Done<T> {
    Read {
        slot: ReadSlot<T>,
        offer: Option<Arc<Offer>>,
        value: T,
    },
    Wrote {
        slot: WriteSlot,
        offer: Option<Arc<Offer>>,
    },
    Pair {
        reader_slot: ReadSlot<T>,
        reader_offer: Option<Arc<Offer>>,
        writer_slot: WriteSlot,
        writer_offer: Option<Arc<Offer>>,
        value: T,
    },
    FailedRead {
        slot: ReadSlot<T>,
        offer: Option<Arc<Offer>>,
        kind: ErrorKind,
        counted: bool,
    },
    FailedWrite {
        slot: WriteSlot,
        offer: Option<Arc<Offer>>,
        kind: ErrorKind,
        counted: bool,
    },
}

#[derive(Debug)]
struct Inner<T> {
    buffer: VecDeque<T>,
    readers: VecDeque<ReadWaiter<T>>,
    writers: VecDeque<WriteWaiter<T>>,
    state: Lifecycle,
}

struct Core<T> {
    id: ChannelId,
    name: Option<Arc<str>>,
    capacity: usize,
    max_readers: Option<usize>,
    max_writers: Option<usize>,
    reader_overflow: Overflow,
    writer_overflow: Overflow,
    inner: Mutex<Inner<T>>,
}

/// A typed rendezvous channel. Clones address the same channel.
pub struct Channel<T> {
    core: Arc<Core<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> std::fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .field("capacity", &self.core.capacity)
            .finish_non_exhaustive()
    }
}

/// Spins through a transient hold; answers whether the offer is ours.
fn acquire(offer: &Arc<Offer>) -> bool {
    loop {
        match offer.try_hold() {
            HoldResult::Acquired => return true,
            HoldResult::Unavailable => return false,
            HoldResult::Busy => std::thread::yield_now(),
        }
    }
}

fn acquire_side(offer: Option<&Arc<Offer>>) -> bool {
    offer.map_or(true, acquire)
}

enum PairHold {
    Both,
    ReaderGone,
    WriterGone,
}

/// Holds both sides of a candidate pairing, in global offer order so that
/// concurrent matchmakers can never form a hold cycle.
fn acquire_pair(reader: Option<&Arc<Offer>>, writer: Option<&Arc<Offer>>) -> PairHold {
    match (reader, writer) {
        (None, None) => PairHold::Both,
        (Some(r), None) => {
            if acquire(r) {
                PairHold::Both
            } else {
                PairHold::ReaderGone
            }
        }
        (None, Some(w)) => {
            if acquire(w) {
                PairHold::Both
            } else {
                PairHold::WriterGone
            }
        }
        (Some(r), Some(w)) => {
            if r.order_key() <= w.order_key() {
                if !acquire(r) {
                    return PairHold::ReaderGone;
                }
                if !acquire(w) {
                    r.release_hold();
                    return PairHold::WriterGone;
                }
            } else {
                if !acquire(w) {
                    return PairHold::WriterGone;
                }
                if !acquire(r) {
                    w.release_hold();
                    return PairHold::ReaderGone;
                }
            }
            PairHold::Both
        }
    }
}

fn fulfil_read<T: Send + 'static>(slot: ReadSlot<T>, channel: ChannelId, value: T) {
    match slot {
        ReadSlot::Single(completer) => {
            completer.fulfil(value);
        }
        ReadSlot::Alt { completer, index } => {
            completer.fulfil(Selection {
                index,
                channel,
                kind: SelectionKind::Read(Box::new(value)),
            });
        }
    }
}

fn fulfil_write(slot: WriteSlot, channel: ChannelId) {
    match slot {
        WriteSlot::Single(completer) => {
            completer.fulfil(());
        }
        WriteSlot::Alt { completer, index } => {
            completer.fulfil(Selection {
                index,
                channel,
                kind: SelectionKind::Wrote,
            });
        }
    }
}

fn fail_read_slot<T>(slot: &ReadSlot<T>, kind: ErrorKind) {
    match slot {
        ReadSlot::Single(completer) => {
            completer.fail(Error::new(kind));
        }
        ReadSlot::Alt { completer, .. } => {
            completer.fail(Error::new(kind));
        }
    }
}

fn fail_write_slot(slot: &WriteSlot, kind: ErrorKind) {
    match slot {
        WriteSlot::Single(completer) => {
            completer.fail(Error::new(kind));
        }
        WriteSlot::Alt { completer, .. } => {
            completer.fail(Error::new(kind));
        }
    }
}

impl<T: Send + 'static> Channel<T> {
    /// An unbuffered channel: writers pair directly with readers.
    #[must_use]
    pub fn rendezvous() -> Self {
        Self::builder().build()
    }

    /// A channel with `capacity` buffer slots.
    #[must_use]
    pub fn buffered(capacity: usize) -> Self {
        Self::builder().capacity(capacity).build()
    }

    /// Starts a builder with the default configuration: capacity 0,
    /// unbounded pending queues, `Reject` overflow on both sides.
    #[must_use]
    pub fn builder() -> ChannelBuilder<T> {
        ChannelBuilder::new()
    }

    /// The channel's stable identity.
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.core.id
    }

    /// The channel's name, if one was configured.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.core.name.as_deref()
    }

    /// The buffer capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.core.capacity
    }

    /// Posts a read with no deadline and no cancellation signal.
    #[must_use]
    pub fn read(&self) -> Op<T> {
        self.read_request(Deadline::never(), None)
    }

    /// Posts a read that fails with `Timeout` once `deadline` passes.
    #[must_use]
    pub fn read_before(&self, deadline: Deadline) -> Op<T> {
        self.read_request(deadline, None)
    }

    /// Posts a read with a deadline and an optional cancellation signal.
    #[must_use]
    pub fn read_request(&self, deadline: Deadline, cancel: Option<&CancelToken>) -> Op<T> {
        let (completer, pending) = completion();
        let offer = self.single_offer(deadline, cancel, {
            let slot = completer.clone();
            Box::new(move |err| {
                slot.fail(err);
            })
        });
        self.post_read(offer.clone(), ReadSlot::Single(completer));
        self.arm_single(&offer, deadline, cancel);
        Op::new(pending, self.rescinder(offer))
    }

    /// Posts a write with no deadline and no cancellation signal.
    #[must_use]
    pub fn write(&self, value: T) -> Op<()> {
        self.write_request(value, Deadline::never(), None)
    }

    /// Posts a write that fails with `Timeout` once `deadline` passes.
    #[must_use]
    pub fn write_before(&self, value: T, deadline: Deadline) -> Op<()> {
        self.write_request(value, deadline, None)
    }

    /// Posts a write with a deadline and an optional cancellation signal.
    #[must_use]
    pub fn write_request(
        &self,
        value: T,
        deadline: Deadline,
        cancel: Option<&CancelToken>,
    ) -> Op<()> {
        let (completer, pending) = completion();
        let offer = self.single_offer(deadline, cancel, {
            let slot = completer.clone();
            Box::new(move |err| {
                slot.fail(err);
            })
        });
        self.post_write(value, offer.clone(), WriteSlot::Single(completer));
        self.arm_single(&offer, deadline, cancel);
        Op::new(pending, self.rescinder(offer))
    }

    /// Reads immediately from the buffer or a queued writer, or reports why
    /// it cannot.
    pub fn try_read(&self) -> Result<T, TryReadError> {
        let mut done = Vec::new();
        let mut inner = self.core.inner.lock().expect("channel lock poisoned");
        if inner.state != Lifecycle::Open {
            return Err(TryReadError::Retired);
        }
        let result = if let Some(value) = inner.buffer.pop_front() {
            // Refill the freed slot from any queued writer.
            self.matchmake(&mut inner, &mut done);
            Ok(value)
        } else if self.core.capacity == 0 {
            loop {
                let Some(writer) = inner.writers.front() else {
                    break Err(TryReadError::Empty);
                };
                if acquire_side(writer.offer.as_ref()) {
                    let WriteWaiter { value, offer, slot } =
                        inner.writers.pop_front().expect("writer present");
                    done.push(Done::Wrote { slot, offer });
                    break Ok(value);
                }
                // Taken elsewhere; drop and try the next writer.
                inner.writers.pop_front();
            }
        } else {
            Err(TryReadError::Empty)
        };
        drop(inner);
        self.deliver(done);
        result
    }

    /// Writes immediately into the buffer or a queued reader, or hands the
    /// value back with the reason it cannot.
    pub fn try_write(&self, value: T) -> Result<(), TryWriteError<T>> {
        let mut done = Vec::new();
        let mut inner = self.core.inner.lock().expect("channel lock poisoned");
        if inner.state != Lifecycle::Open {
            return Err(TryWriteError::Retired(value));
        }
        let result = if self.core.capacity == 0 {
            loop {
                let Some(reader) = inner.readers.front() else {
                    break Err(TryWriteError::Full(value));
                };
                if acquire_side(reader.offer.as_ref()) {
                    let ReadWaiter { offer, slot } =
                        inner.readers.pop_front().expect("reader present");
                    done.push(Done::Read { slot, offer, value });
                    break Ok(());
                }
                // Taken elsewhere; drop and try the next reader.
                inner.readers.pop_front();
            }
        } else if inner.buffer.len() < self.core.capacity {
            inner.buffer.push_back(value);
            self.matchmake(&mut inner, &mut done);
            Ok(())
        } else {
            Err(TryWriteError::Full(value))
        };
        drop(inner);
        self.deliver(done);
        result
    }

    /// Retires the channel after draining what can still pair. Idempotent.
    pub fn retire(&self) {
        self.do_retire(false);
    }

    /// Retires the channel at once, failing everything queued. Idempotent.
    pub fn retire_immediate(&self) {
        self.do_retire(true);
    }

    /// Non-mutating snapshot of queue lengths and state.
    #[must_use]
    pub fn probe(&self) -> ChannelProbe {
        let inner = self.core.inner.lock().expect("channel lock poisoned");
        ChannelProbe {
            state: inner.state,
            buffered: inner.buffer.len(),
            pending_readers: inner.readers.len(),
            pending_writers: inner.writers.len(),
        }
    }

    // ---- alternation entry points -------------------------------------

    pub(crate) fn post_alt_read(
        &self,
        offer: &Arc<Offer>,
        completer: &Completer<Selection>,
        index: usize,
    ) {
        self.post_read(
            Some(Arc::clone(offer)),
            ReadSlot::Alt {
                completer: completer.clone(),
                index,
            },
        );
    }

    pub(crate) fn post_alt_write(
        &self,
        value: T,
        offer: &Arc<Offer>,
        completer: &Completer<Selection>,
        index: usize,
    ) {
        self.post_write(
            value,
            Some(Arc::clone(offer)),
            WriteSlot::Alt {
                completer: completer.clone(),
                index,
            },
        );
    }

    /// Removes every queued request belonging to `offer`. Called when the
    /// alternation that posted them has resolved (or was dropped).
    pub(crate) fn rescind(&self, offer: &Arc<Offer>) {
        let mut inner = self.core.inner.lock().expect("channel lock poisoned");
        inner
            .readers
            .retain(|r| !r.offer.as_ref().is_some_and(|o| Arc::ptr_eq(o, offer)));
        inner
            .writers
            .retain(|w| !w.offer.as_ref().is_some_and(|o| Arc::ptr_eq(o, offer)));
    }

    // ---- internals ----------------------------------------------------

    /// Single requests with a deadline or cancel signal get their own
    /// trivial offer so the timer and token have something to withdraw.
    fn single_offer(
        &self,
        deadline: Deadline,
        cancel: Option<&CancelToken>,
        on_abort: Box<dyn FnOnce(Error) + Send>,
    ) -> Option<Arc<Offer>> {
        if matches!(deadline, Deadline::Never) && cancel.is_none() {
            None
        } else {
            Some(Offer::new(None, on_abort))
        }
    }

    fn arm_single(&self, offer: &Option<Arc<Offer>>, deadline: Deadline, cancel: Option<&CancelToken>) {
        if let Some(offer) = offer {
            timer::schedule(deadline, offer);
            if let Some(token) = cancel {
                token.watch(offer);
            }
            offer.mark_probe_complete();
        }
    }

    fn rescinder(&self, offer: Option<Arc<Offer>>) -> Option<Box<dyn FnOnce() + Send>> {
        offer.map(|offer| {
            let chan = self.clone();
            Box::new(move || chan.rescind(&offer)) as Box<dyn FnOnce() + Send>
        })
    }

    fn post_read(&self, offer: Option<Arc<Offer>>, slot: ReadSlot<T>) {
        let mut done = Vec::new();
        let mut inner = self.core.inner.lock().expect("channel lock poisoned");
        if inner.state != Lifecycle::Open {
            drop(inner);
            self.deliver(vec![Done::FailedRead {
                slot,
                offer,
                kind: ErrorKind::Retired,
                counted: false,
            }]);
            return;
        }
        // Fast path: a satisfiable read skips cap enforcement entirely.
        let immediate = !inner.buffer.is_empty() || !inner.writers.is_empty();
        if !immediate && cap_reached(inner.readers.len(), self.core.max_readers) {
            match self.core.reader_overflow {
                Overflow::Reject => {
                    drop(inner);
                    self.deliver(vec![Done::FailedRead {
                        slot,
                        offer,
                        kind: ErrorKind::Overflow,
                        counted: false,
                    }]);
                    return;
                }
                Overflow::Lifo | Overflow::Fifo => {
                    let evicted = if self.core.reader_overflow == Overflow::Lifo {
                        inner.readers.pop_back()
                    } else {
                        inner.readers.pop_front()
                    };
                    match evicted {
                        Some(waiter) => done.push(Done::FailedRead {
                            slot: waiter.slot,
                            offer: waiter.offer,
                            kind: ErrorKind::Overflow,
                            counted: true,
                        }),
                        // A zero cap leaves nothing to evict.
                        None => {
                            drop(inner);
                            self.deliver(vec![Done::FailedRead {
                                slot,
                                offer,
                                kind: ErrorKind::Overflow,
                                counted: false,
                            }]);
                            return;
                        }
                    }
                }
            }
        }
        if let Some(offer) = &offer {
            offer.candidate_enqueued();
        }
        inner.readers.push_back(ReadWaiter { offer, slot });
        self.matchmake(&mut inner, &mut done);
        drop(inner);
        self.deliver(done);
    }

    fn post_write(&self, value: T, offer: Option<Arc<Offer>>, slot: WriteSlot) {
        let mut done = Vec::new();
        let mut inner = self.core.inner.lock().expect("channel lock poisoned");
        if inner.state != Lifecycle::Open {
            drop(inner);
            self.deliver(vec![Done::FailedWrite {
                slot,
                offer,
                kind: ErrorKind::Retired,
                counted: false,
            }]);
            return;
        }
        let immediate = inner.buffer.len() < self.core.capacity || !inner.readers.is_empty();
        if !immediate && cap_reached(inner.writers.len(), self.core.max_writers) {
            match self.core.writer_overflow {
                Overflow::Reject => {
                    drop(inner);
                    self.deliver(vec![Done::FailedWrite {
                        slot,
                        offer,
                        kind: ErrorKind::Overflow,
                        counted: false,
                    }]);
                    return;
                }
                Overflow::Lifo | Overflow::Fifo => {
                    let evicted = if self.core.writer_overflow == Overflow::Lifo {
                        inner.writers.pop_back()
                    } else {
                        inner.writers.pop_front()
                    };
                    match evicted {
                        Some(waiter) => done.push(Done::FailedWrite {
                            slot: waiter.slot,
                            offer: waiter.offer,
                            kind: ErrorKind::Overflow,
                            counted: true,
                        }),
                        None => {
                            drop(inner);
                            self.deliver(vec![Done::FailedWrite {
                                slot,
                                offer,
                                kind: ErrorKind::Overflow,
                                counted: false,
                            }]);
                            return;
                        }
                    }
                }
            }
        }
        if let Some(offer) = &offer {
            offer.candidate_enqueued();
        }
        inner.writers.push_back(WriteWaiter { value, offer, slot });
        self.matchmake(&mut inner, &mut done);
        drop(inner);
        self.deliver(done);
    }

    /// The pairing loop. Runs under the channel lock on every mutating
    /// operation; produces completions that the caller executes after the
    /// lock is released.
    fn matchmake(&self, inner: &mut Inner<T>, done: &mut Vec<Done<T>>) {
        loop {
            // Head buffered value -> head reader.
            if !inner.buffer.is_empty() && !inner.readers.is_empty() {
                let held = {
                    let reader = inner.readers.front().expect("reader present");
                    acquire_side(reader.offer.as_ref())
                };
                if held {
                    let ReadWaiter { offer, slot } =
                        inner.readers.pop_front().expect("reader present");
                    let value = inner.buffer.pop_front().expect("buffer non-empty");
                    done.push(Done::Read { slot, offer, value });
                } else {
                    // Declined: the reader committed or withdrew elsewhere.
                    inner.readers.pop_front();
                }
                continue;
            }
            // Head writer -> free buffer slot.
            if inner.buffer.len() < self.core.capacity && !inner.writers.is_empty() {
                let held = {
                    let writer = inner.writers.front().expect("writer present");
                    acquire_side(writer.offer.as_ref())
                };
                if held {
                    let WriteWaiter { value, offer, slot } =
                        inner.writers.pop_front().expect("writer present");
                    inner.buffer.push_back(value);
                    done.push(Done::Wrote { slot, offer });
                } else {
                    inner.writers.pop_front();
                }
                continue;
            }
            // Rendezvous: head writer -> head reader, both sides offered.
            if self.core.capacity == 0 && !inner.readers.is_empty() && !inner.writers.is_empty() {
                let held = {
                    let reader = inner.readers.front().expect("reader present");
                    let writer = inner.writers.front().expect("writer present");
                    acquire_pair(reader.offer.as_ref(), writer.offer.as_ref())
                };
                match held {
                    PairHold::Both => {
                        let ReadWaiter {
                            offer: reader_offer,
                            slot: reader_slot,
                        } = inner.readers.pop_front().expect("reader present");
                        let WriteWaiter {
                            value,
                            offer: writer_offer,
                            slot: writer_slot,
                        } = inner.writers.pop_front().expect("writer present");
                        done.push(Done::Pair {
                            reader_slot,
                            reader_offer,
                            writer_slot,
                            writer_offer,
                            value,
                        });
                    }
                    PairHold::ReaderGone => {
                        inner.readers.pop_front();
                    }
                    PairHold::WriterGone => {
                        inner.writers.pop_front();
                    }
                }
                continue;
            }
            break;
        }
    }

    /// Executes deferred completions.
    ///
    /// Runs in two phases. First every committed offer's state is flipped,
    /// so that no offer in the batch is still transiently held once user
    /// code starts running: a commit hook may re-enter a channel whose
    /// matchmaker is spinning on a sibling offer. Then, per offer, the
    /// commit hook runs before its completer is fulfilled.
    fn deliver(&self, done: Vec<Done<T>>) {
        let id = self.core.id;
        for item in &done {
            match item {
                Done::Read { offer, .. } | Done::Wrote { offer, .. } => {
                    if let Some(offer) = offer {
                        offer.commit_state(id);
                    }
                }
                Done::Pair {
                    reader_offer,
                    writer_offer,
                    ..
                } => {
                    if let Some(offer) = reader_offer {
                        offer.commit_state(id);
                    }
                    if let Some(offer) = writer_offer {
                        offer.commit_state(id);
                    }
                }
                Done::FailedRead { .. } | Done::FailedWrite { .. } => {}
            }
        }
        for item in done {
            match item {
                Done::Read { slot, offer, value } => {
                    if let Some(offer) = &offer {
                        offer.run_commit_hook();
                    }
                    fulfil_read(slot, id, value);
                }
                Done::Wrote { slot, offer } => {
                    if let Some(offer) = &offer {
                        offer.run_commit_hook();
                    }
                    fulfil_write(slot, id);
                }
                Done::Pair {
                    reader_slot,
                    reader_offer,
                    writer_slot,
                    writer_offer,
                    value,
                } => {
                    if let Some(offer) = &reader_offer {
                        offer.run_commit_hook();
                    }
                    if let Some(offer) = &writer_offer {
                        offer.run_commit_hook();
                    }
                    fulfil_read(reader_slot, id, value);
                    fulfil_write(writer_slot, id);
                }
                Done::FailedRead {
                    slot,
                    offer,
                    kind,
                    counted,
                } => match offer {
                    Some(offer) => {
                        if counted {
                            offer.candidate_gone(kind);
                        } else {
                            offer.candidate_refused(kind);
                        }
                    }
                    None => fail_read_slot(&slot, kind),
                },
                Done::FailedWrite {
                    slot,
                    offer,
                    kind,
                    counted,
                } => match offer {
                    Some(offer) => {
                        if counted {
                            offer.candidate_gone(kind);
                        } else {
                            offer.candidate_refused(kind);
                        }
                    }
                    None => fail_write_slot(&slot, kind),
                },
            }
        }
    }

    fn do_retire(&self, immediate: bool) {
        let mut done = Vec::new();
        let mut inner = self.core.inner.lock().expect("channel lock poisoned");
        if inner.state == Lifecycle::Retired {
            return;
        }
        inner.state = Lifecycle::Retiring;
        if !immediate {
            // Drain: buffered values to queued readers, queued writers into
            // freed slots.
            self.matchmake(&mut inner, &mut done);
        }
        while let Some(ReadWaiter { offer, slot }) = inner.readers.pop_front() {
            done.push(Done::FailedRead {
                slot,
                offer,
                kind: ErrorKind::Retired,
                counted: true,
            });
        }
        while let Some(WriteWaiter { offer, slot, .. }) = inner.writers.pop_front() {
            done.push(Done::FailedWrite {
                slot,
                offer,
                kind: ErrorKind::Retired,
                counted: true,
            });
        }
        // New reads are refused while retiring, so leftover buffered values
        // can never drain; discard them and finish.
        inner.buffer.clear();
        inner.state = Lifecycle::Retired;
        drop(inner);
        tracing::debug!(channel = %self.core.id, immediate, "channel retired");
        self.deliver(done);
    }
}

fn cap_reached(len: usize, cap: Option<usize>) -> bool {
    cap.is_some_and(|cap| len >= cap)
}

/// Configures and creates a [`Channel`].
pub struct ChannelBuilder<T> {
    capacity: usize,
    max_readers: Option<usize>,
    max_writers: Option<usize>,
    reader_overflow: Overflow,
    writer_overflow: Overflow,
    name: Option<String>,
    _payload: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> ChannelBuilder<T> {
    fn new() -> Self {
        Self {
            capacity: 0,
            max_readers: None,
            max_writers: None,
            reader_overflow: Overflow::Reject,
            writer_overflow: Overflow::Reject,
            name: None,
            _payload: PhantomData,
        }
    }

    /// Buffer capacity; 0 means rendezvous.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Caps the pending-reader queue. Unbounded by default.
    #[must_use]
    pub fn max_pending_readers(mut self, cap: usize) -> Self {
        self.max_readers = Some(cap);
        self
    }

    /// Caps the pending-writer queue. Unbounded by default.
    #[must_use]
    pub fn max_pending_writers(mut self, cap: usize) -> Self {
        self.max_writers = Some(cap);
        self
    }

    /// Overflow policy for the reader queue.
    #[must_use]
    pub fn reader_overflow(mut self, policy: Overflow) -> Self {
        self.reader_overflow = policy;
        self
    }

    /// Overflow policy for the writer queue.
    #[must_use]
    pub fn writer_overflow(mut self, policy: Overflow) -> Self {
        self.writer_overflow = policy;
        self
    }

    /// Names the channel. Required for [`ChannelBuilder::register`].
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builds the channel without registering it anywhere.
    #[must_use]
    pub fn build(self) -> Channel<T> {
        let id = ChannelId::next();
        tracing::trace!(channel = %id, name = ?self.name, capacity = self.capacity, "channel created");
        Channel {
            core: Arc::new(Core {
                id,
                name: self.name.map(Into::into),
                capacity: self.capacity,
                max_readers: self.max_readers,
                max_writers: self.max_writers,
                reader_overflow: self.reader_overflow,
                writer_overflow: self.writer_overflow,
                inner: Mutex::new(Inner {
                    buffer: VecDeque::new(),
                    readers: VecDeque::new(),
                    writers: VecDeque::new(),
                    state: Lifecycle::Open,
                }),
            }),
        }
    }

    /// Builds the channel under its name in `scope`, or returns the channel
    /// already registered there. Lookup walks the scope chain first.
    pub fn register(self, scope: &Arc<Scope>) -> Result<Channel<T>, RegistryError> {
        let Some(name) = self.name.clone() else {
            return Err(RegistryError::MissingName);
        };
        scope.get_or_create(&name, move || self.build())
    }
}
