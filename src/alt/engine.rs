//! The alternation engine: request erasure, validation, posting.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use smallvec::SmallVec;

use crate::cancel::CancelToken;
use crate::channel::{Channel, ChannelId};
use crate::completion::{completion, Completer, Pending};
use crate::error::{Error, Result};
use crate::offer::{CommitHook, Offer};
use crate::time::Deadline;
use crate::timer;
use crate::util::Rng;

use super::{Priority, Selection, SelectionKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dir {
    Read,
    Write,
}

type PostFn = Box<dyn FnOnce(&Arc<Offer>, &Completer<Selection>, usize) + Send>;
type RescindFn = Box<dyn FnOnce(&Arc<Offer>) + Send>;

/// One candidate request of an alternation, erased over the channel's
/// payload type. Write requests own their value.
pub struct AltRequest {
    channel: ChannelId,
    dir: Dir,
    post: PostFn,
    rescind: RescindFn,
}

impl std::fmt::Debug for AltRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AltRequest")
            .field("channel", &self.channel)
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl AltRequest {
    /// A read candidate against `chan`.
    #[must_use]
    pub fn read<T: Send + 'static>(chan: &Channel<T>) -> Self {
        let poster = chan.clone();
        let rescinder = chan.clone();
        Self {
            channel: chan.id(),
            dir: Dir::Read,
            post: Box::new(move |offer, completer, index| {
                poster.post_alt_read(offer, completer, index);
            }),
            rescind: Box::new(move |offer| rescinder.rescind(offer)),
        }
    }

    /// A write candidate against `chan`, carrying `value`.
    #[must_use]
    pub fn write<T: Send + 'static>(chan: &Channel<T>, value: T) -> Self {
        let poster = chan.clone();
        let rescinder = chan.clone();
        Self {
            channel: chan.id(),
            dir: Dir::Write,
            post: Box::new(move |offer, completer, index| {
                poster.post_alt_write(value, offer, completer, index);
            }),
            rescind: Box::new(move |offer| rescinder.rescind(offer)),
        }
    }
}

/// An in-flight alternation. Blocks via [`AltOp::wait`] or awaits as a
/// `Future`; resolving (or dropping) the handle rescinds every queued
/// candidate, so losing channels are left clean.
#[must_use = "an AltOp does nothing until waited or awaited"]
#[derive(Debug)]
pub struct AltOp {
    offer: Arc<Offer>,
    pending: Option<Pending<Selection>>,
    rescinds: Rescinds,
}

struct Rescinds(Vec<RescindFn>);

impl std::fmt::Debug for Rescinds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Rescinds({})", self.0.len())
    }
}

impl AltOp {
    /// Blocks the calling thread until one request commits or the alt
    /// fails as a whole.
    pub fn wait(mut self) -> Result<Selection> {
        let pending = self
            .pending
            .take()
            .expect("alternation already completed");
        let outcome = pending.wait();
        if let Ok(selection) = &outcome {
            // The completer is only fulfilled by the channel that won the
            // atomic commit; the arbiter must agree on the winner.
            debug_assert_eq!(self.offer.winner(), Some(selection.channel));
        }
        self.cleanup();
        outcome
    }

    /// Returns true once the alternation has resolved.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.pending.as_ref().map_or(true, Pending::is_resolved)
    }

    fn cleanup(&mut self) {
        for rescind in self.rescinds.0.drain(..) {
            rescind(&self.offer);
        }
    }
}

impl Future for AltOp {
    type Output = Result<Selection>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let pending = this
            .pending
            .as_mut()
            .expect("alternation already completed");
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

impl Drop for AltOp {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn validate(requests: &[AltRequest]) -> Result<()> {
    if requests.is_empty() {
        return Err(Error::invalid("empty alternation"));
    }
    let mut seen: SmallVec<[(ChannelId, Dir); 8]> = SmallVec::new();
    for request in requests {
        if seen
            .iter()
            .any(|(id, dir)| *id == request.channel && *dir != request.dir)
        {
            return Err(Error::invalid(format!(
                "read and write against {} in one alternation",
                request.channel
            )));
        }
        seen.push((request.channel, request.dir));
    }
    Ok(())
}

fn caller_order(len: usize) -> Vec<usize> {
    (0..len).collect()
}

fn shuffled_order(len: usize) -> Vec<usize> {
    let mut order = caller_order(len);
    Rng::from_entropy().shuffle(&mut order);
    order
}

/// Posts validated requests in the given order and hands back the handle.
///
/// Every request is posted unless the offer decides early (a channel with
/// immediate data commits during posting, or a pre-fired cancel token
/// withdrew the offer). The probe-complete mark after the loop lets the
/// offer settle itself once the last candidate is known.
pub(crate) fn post_ordered(
    requests: Vec<AltRequest>,
    order: Vec<usize>,
    deadline: Deadline,
    cancel: Option<&CancelToken>,
    on_commit: Option<CommitHook>,
) -> Result<AltOp> {
    validate(&requests)?;
    let (completer, pending) = completion();
    let abort = {
        let slot = completer.clone();
        Box::new(move |err: Error| {
            slot.fail(err);
        })
    };
    let offer = Offer::new(on_commit, abort);
    timer::schedule(deadline, &offer);
    if let Some(token) = cancel {
        token.watch(&offer);
    }
    let mut slots: Vec<Option<AltRequest>> = requests.into_iter().map(Some).collect();
    let mut rescinds = Vec::with_capacity(slots.len());
    for index in order {
        if offer.is_decided() {
            break;
        }
        let Some(request) = slots.get_mut(index).and_then(Option::take) else {
            continue;
        };
        (request.post)(&offer, &completer, index);
        rescinds.push(request.rescind);
    }
    offer.mark_probe_complete();
    Ok(AltOp {
        offer,
        pending: Some(pending),
        rescinds: Rescinds(rescinds),
    })
}

/// Offers all `requests` and commits exactly one.
///
/// Fails synchronously with `InvalidOperation` for an empty request list,
/// for `Priority::Fair` (which needs a [`super::ReadSet`]/[`super::WriteSet`]
/// to carry its cursor), and for a read and a write against the same
/// channel.
pub fn select(
    requests: Vec<AltRequest>,
    priority: Priority,
    deadline: Deadline,
    cancel: Option<&CancelToken>,
) -> Result<AltOp> {
    let order = match priority {
        Priority::First | Priority::Any => caller_order(requests.len()),
        Priority::Random => shuffled_order(requests.len()),
        Priority::Fair => {
            return Err(Error::invalid("construct a ChannelSet for fair operations"))
        }
    };
    post_ordered(requests, order, deadline, cancel, None)
}

/// Reads one value from whichever channel commits first.
pub fn read_any<T: Send + 'static>(
    channels: &[Channel<T>],
    priority: Priority,
    deadline: Deadline,
) -> Result<(T, ChannelId)> {
    let requests = channels.iter().map(AltRequest::read).collect();
    let selection = select(requests, priority, deadline, None)?.wait()?;
    Ok((read_payload(selection.kind), selection.channel))
}

/// Writes `value` to whichever channel commits first. One clone of the
/// value is offered to each candidate; the losers' clones are dropped.
pub fn write_any<T: Clone + Send + 'static>(
    value: &T,
    channels: &[Channel<T>],
    priority: Priority,
    deadline: Deadline,
) -> Result<ChannelId> {
    let requests = channels
        .iter()
        .map(|chan| AltRequest::write(chan, value.clone()))
        .collect();
    let selection = select(requests, priority, deadline, None)?.wait()?;
    Ok(selection.channel)
}

/// Offers a mixed batch of reads and writes and reports the one that
/// committed.
pub fn read_or_write_any(
    requests: Vec<AltRequest>,
    priority: Priority,
    deadline: Deadline,
) -> Result<Selection> {
    select(requests, priority, deadline, None)?.wait()
}

fn read_payload<T: Send + 'static>(kind: SelectionKind) -> T {
    let SelectionKind::Read(payload) = kind else {
        unreachable!("read-only alternation completed as a write")
    };
    *payload
        .downcast::<T>()
        .expect("alternation payload matches channel payload type")
}

/// Builder-style alternation over mixed requests.
#[derive(Default)]
pub struct Alt {
    requests: Vec<AltRequest>,
    priority: Priority,
    deadline: Deadline,
    cancel: Option<CancelToken>,
    on_commit: Option<CommitHook>,
}

impl std::fmt::Debug for Alt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Alt")
            .field("requests", &self.requests)
            .field("priority", &self.priority)
            .field("deadline", &self.deadline)
            .field("cancel", &self.cancel.is_some())
            .field("on_commit", &self.on_commit.is_some())
            .finish()
    }
}

impl Alt {
    /// Starts an empty alternation with `First` priority and no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a read candidate.
    #[must_use]
    pub fn read<T: Send + 'static>(mut self, chan: &Channel<T>) -> Self {
        self.requests.push(AltRequest::read(chan));
        self
    }

    /// Adds a write candidate carrying `value`.
    #[must_use]
    pub fn write<T: Send + 'static>(mut self, chan: &Channel<T>, value: T) -> Self {
        self.requests.push(AltRequest::write(chan, value));
        self
    }

    /// Adds a pre-built request.
    #[must_use]
    pub fn request(mut self, request: AltRequest) -> Self {
        self.requests.push(request);
        self
    }

    /// Sets the selection policy. `Fair` is rejected at post time; use a
    /// [`super::ReadSet`]/[`super::WriteSet`].
    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the deadline for the whole alternation.
    #[must_use]
    pub fn deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// Attaches a cancellation signal.
    #[must_use]
    pub fn cancel(mut self, token: &CancelToken) -> Self {
        self.cancel = Some(token.clone());
        self
    }

    /// Registers a hook run exactly once at commit, before the winning
    /// completer resolves.
    #[must_use]
    pub fn on_commit(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_commit = Some(Box::new(hook));
        self
    }

    /// Posts the alternation and returns its handle.
    pub fn post(self) -> Result<AltOp> {
        let order = match self.priority {
            Priority::First | Priority::Any => caller_order(self.requests.len()),
            Priority::Random => shuffled_order(self.requests.len()),
            Priority::Fair => {
                return Err(Error::invalid("construct a ChannelSet for fair operations"))
            }
        };
        post_ordered(
            self.requests,
            order,
            self.deadline,
            self.cancel.as_ref(),
            self.on_commit,
        )
    }

    /// Posts and blocks for the outcome.
    pub fn wait(self) -> Result<Selection> {
        self.post()?.wait()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn empty_alternation_is_invalid() {
        init_test("empty_alternation_is_invalid");
        let err = select(Vec::new(), Priority::First, Deadline::never(), None)
            .err()
            .expect("empty alt rejected");
        crate::assert_with_log!(
            err.kind() == ErrorKind::InvalidOperation,
            "invalid kind",
            ErrorKind::InvalidOperation,
            err.kind()
        );
        crate::test_complete!("empty_alternation_is_invalid");
    }

    #[test]
    fn fair_without_a_set_is_invalid() {
        let chan = Channel::<i32>::rendezvous();
        let err = select(
            vec![AltRequest::read(&chan)],
            Priority::Fair,
            Deadline::never(),
            None,
        )
        .err()
        .expect("fair rejected");
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
        assert!(err.to_string().contains("ChannelSet"));
    }

    #[test]
    fn read_and_write_on_one_channel_is_invalid() {
        let chan = Channel::<i32>::rendezvous();
        let err = select(
            vec![AltRequest::read(&chan), AltRequest::write(&chan, 1)],
            Priority::First,
            Deadline::never(),
            None,
        )
        .err()
        .expect("conflicting directions rejected");
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    }

    #[test]
    fn two_reads_on_one_channel_are_allowed() {
        let chan = Channel::<i32>::buffered(1);
        chan.write(1).wait().expect("buffers");
        let requests = vec![AltRequest::read(&chan), AltRequest::read(&chan)];
        let selection = select(requests, Priority::First, Deadline::never(), None)
            .expect("valid alt")
            .wait()
            .expect("one read commits");
        assert_eq!(selection.channel, chan.id());
    }

    #[test]
    fn first_priority_prefers_earlier_ready_channel() {
        init_test("first_priority_prefers_earlier_ready_channel");
        let a = Channel::<i32>::buffered(1);
        let b = Channel::<i32>::buffered(1);
        a.write(1).wait().expect("buffers");
        b.write(2).wait().expect("buffers");
        let (value, winner) =
            read_any(&[a.clone(), b.clone()], Priority::First, Deadline::never())
                .expect("data available");
        crate::assert_with_log!(winner == a.id(), "first channel wins", a.id(), winner);
        crate::assert_with_log!(value == 1, "first channel value", 1, value);
        // The loser keeps its value: exactly one request committed.
        crate::assert_with_log!(
            b.probe().buffered == 1,
            "loser untouched",
            1,
            b.probe().buffered
        );
        crate::test_complete!("first_priority_prefers_earlier_ready_channel");
    }

    #[test]
    fn selection_reports_original_index() {
        let a = Channel::<i32>::rendezvous();
        let b = Channel::<i32>::buffered(1);
        b.write(9).wait().expect("buffers");
        let selection = Alt::new().read(&a).read(&b).wait().expect("b has data");
        assert_eq!(selection.index, 1);
        assert_eq!(selection.channel, b.id());
        assert_eq!(selection.into_value::<i32>(), Some(9));
    }

    #[test]
    fn mixed_payload_types_cross_erased() {
        init_test("mixed_payload_types_cross_erased");
        let numbers = Channel::<i32>::rendezvous();
        let words = Channel::<String>::buffered(1);
        words.write("two".to_owned()).wait().expect("buffers");
        let selection = Alt::new()
            .read(&numbers)
            .read(&words)
            .wait()
            .expect("words has data");
        crate::assert_with_log!(
            selection.channel == words.id(),
            "winner",
            words.id(),
            selection.channel
        );
        let value = selection.into_value::<String>().expect("string payload");
        crate::assert_with_log!(value == "two", "payload", "two", value);
        crate::test_complete!("mixed_payload_types_cross_erased");
    }

    #[test]
    fn write_alternation_commits_one_channel() {
        let a = Channel::<i32>::rendezvous();
        let b = Channel::<i32>::buffered(1);
        let winner = write_any(&5, &[a.clone(), b.clone()], Priority::First, Deadline::never())
            .expect("b has a free slot");
        assert_eq!(winner, b.id());
        assert_eq!(b.try_read().expect("value landed"), 5);
        assert_eq!(a.probe().pending_writers, 0);
    }

    #[test]
    fn mixed_read_write_alternation() {
        let source = Channel::<i32>::rendezvous();
        let sink = Channel::<i32>::buffered(1);
        let selection = read_or_write_any(
            vec![AltRequest::read(&source), AltRequest::write(&sink, 7)],
            Priority::First,
            Deadline::never(),
        )
        .expect("sink has a free slot");
        assert!(selection.is_write());
        assert_eq!(selection.channel, sink.id());
        assert_eq!(sink.try_read().expect("value landed"), 7);
    }

    #[test]
    fn alternation_times_out_and_rescinds_everywhere() {
        init_test("alternation_times_out_and_rescinds_everywhere");
        let channels: Vec<_> = (0..3).map(|_| Channel::<i32>::rendezvous()).collect();
        let err = read_any(
            &channels,
            Priority::First,
            Deadline::after(Duration::from_millis(80)),
        )
        .expect_err("no writers");
        crate::assert_with_log!(
            err.kind() == ErrorKind::Timeout,
            "timeout kind",
            ErrorKind::Timeout,
            err.kind()
        );
        for chan in &channels {
            let probe = chan.probe();
            crate::assert_with_log!(
                probe.pending_readers == 0,
                "no spurious reader queued",
                0,
                probe.pending_readers
            );
        }
        crate::test_complete!("alternation_times_out_and_rescinds_everywhere");
    }

    #[test]
    fn cancellation_fails_the_alternation() {
        let chan = Channel::<i32>::rendezvous();
        let token = CancelToken::new();
        let op = Alt::new()
            .read(&chan)
            .cancel(&token)
            .post()
            .expect("valid alt");
        let canceller = {
            let token = token.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(30));
                token.cancel();
            })
        };
        let err = op.wait().expect_err("cancelled");
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        canceller.join().expect("canceller panicked");
        assert_eq!(chan.probe().pending_readers, 0);
    }

    #[test]
    fn all_channels_retired_fails_with_retired() {
        let a = Channel::<i32>::rendezvous();
        let b = Channel::<i32>::rendezvous();
        a.retire();
        b.retire();
        let err = read_any(&[a, b], Priority::First, Deadline::never()).expect_err("all retired");
        assert_eq!(err.kind(), ErrorKind::Retired);
    }

    #[test]
    fn retirement_during_wait_fails_the_alternation() {
        let a = Channel::<i32>::rendezvous();
        let b = Channel::<i32>::rendezvous();
        let op = Alt::new().read(&a).read(&b).post().expect("valid alt");
        let retirer = {
            let (a, b) = (a.clone(), b.clone());
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                a.retire();
                b.retire();
            })
        };
        let err = op.wait().expect_err("both retired");
        assert_eq!(err.kind(), ErrorKind::Retired);
        retirer.join().expect("retirer panicked");
    }

    #[test]
    fn commit_hook_runs_before_the_outcome_lands() {
        init_test("commit_hook_runs_before_the_outcome_lands");
        let chan = Channel::<i32>::buffered(1);
        chan.write(1).wait().expect("buffers");
        let order = std::sync::Arc::new(AtomicUsize::new(0));
        let hook_order = std::sync::Arc::clone(&order);
        let selection = Alt::new()
            .read(&chan)
            .on_commit(move || {
                hook_order.store(1, Ordering::SeqCst);
            })
            .wait()
            .expect("commits");
        // By the time the outcome is observable the hook has run.
        crate::assert_with_log!(
            order.load(Ordering::SeqCst) == 1,
            "hook ran first",
            1,
            order.load(Ordering::SeqCst)
        );
        assert_eq!(selection.into_value::<i32>(), Some(1));
        crate::test_complete!("commit_hook_runs_before_the_outcome_lands");
    }

    #[test]
    fn random_priority_reaches_every_candidate() {
        let a = Channel::<i32>::buffered(1);
        let b = Channel::<i32>::buffered(1);
        let mut winners = std::collections::HashSet::new();
        for _ in 0..200 {
            a.try_write(1).ok();
            b.try_write(2).ok();
            let (_, winner) = read_any(
                &[a.clone(), b.clone()],
                Priority::Random,
                Deadline::never(),
            )
            .expect("both ready");
            winners.insert(winner);
            if winners.len() == 2 {
                break;
            }
        }
        assert_eq!(winners.len(), 2, "random order never reached one channel");
    }

    #[test]
    fn evicted_candidate_leaves_the_alternation_probing() {
        init_test("evicted_candidate_leaves_the_alternation_probing");
        let narrow = Channel::<i32>::builder()
            .max_pending_readers(1)
            .reader_overflow(crate::channel::Overflow::Lifo)
            .build();
        let wide = Channel::<i32>::rendezvous();
        let op = Alt::new().read(&narrow).read(&wide).post().expect("valid");
        // A later single read evicts the alt's candidacy on the narrow
        // channel; the alt itself stays live on the other.
        let displaced = narrow.read();
        assert!(!op.is_complete(), "alt failed although wide is still live");
        let writer = {
            let wide = wide.clone();
            std::thread::spawn(move || wide.write(3).wait())
        };
        let selection = op.wait().expect("wide still pairs");
        crate::assert_with_log!(
            selection.channel == wide.id(),
            "winner",
            wide.id(),
            selection.channel
        );
        writer
            .join()
            .expect("writer panicked")
            .expect("write paired");
        // The displacing read is still queued on the narrow channel.
        assert_eq!(narrow.probe().pending_readers, 1);
        drop(displaced);
        crate::test_complete!("evicted_candidate_leaves_the_alternation_probing");
    }

    #[test]
    fn alternation_with_every_candidate_evicted_reports_overflow() {
        let narrow = Channel::<i32>::builder()
            .max_pending_readers(1)
            .reader_overflow(crate::channel::Overflow::Lifo)
            .build();
        let op = Alt::new().read(&narrow).post().expect("valid");
        let _displaced = narrow.read();
        let err = op.wait().expect_err("sole candidacy evicted");
        assert_eq!(err.kind(), ErrorKind::Overflow);
    }

    #[test]
    fn dropping_the_handle_rescinds_candidates() {
        let a = Channel::<i32>::rendezvous();
        let b = Channel::<i32>::rendezvous();
        let op = Alt::new().read(&a).read(&b).post().expect("valid alt");
        assert_eq!(a.probe().pending_readers, 1);
        assert_eq!(b.probe().pending_readers, 1);
        drop(op);
        assert_eq!(a.probe().pending_readers, 0);
        assert_eq!(b.probe().pending_readers, 0);
    }

    #[test]
    fn concurrent_alts_commit_exactly_once_each() {
        init_test("concurrent_alts_commit_exactly_once_each");
        let chan = Channel::<usize>::rendezvous();
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let chan = chan.clone();
                std::thread::spawn(move || {
                    read_any(&[chan], Priority::First, Deadline::never())
                        .expect("writer arrives")
                        .0
                })
            })
            .collect();
        for i in 0..4 {
            chan.write(i).wait().expect("reader arrives");
        }
        let mut received: Vec<_> = readers
            .into_iter()
            .map(|handle| handle.join().expect("reader panicked"))
            .collect();
        received.sort_unstable();
        crate::assert_with_log!(
            received == vec![0, 1, 2, 3],
            "each value delivered once",
            vec![0usize, 1, 2, 3],
            received
        );
        crate::test_complete!("concurrent_alts_commit_exactly_once_each");
    }
}
