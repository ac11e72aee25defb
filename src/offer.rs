//! The offer arbiter: at-most-one commit across the requests of one alt.
//!
//! Every alternation (and every single request carrying a deadline or a
//! cancellation signal) shares one [`Offer`] between all the channels it is
//! posted on. Channels ask the offer for permission before committing a
//! pairing; the offer's atomic state word guarantees that exactly one
//! channel wins, no matter how many race.
//!
//! State machine:
//!
//! ```text
//!             try_hold            commit
//!   Probing ───────────► Held ───────────► Committed
//!      │  ▲                │
//!      │  └── release_hold ┘        (counterpart side declined)
//!      │
//!      └──── withdraw ────► Withdrawn     (timeout / cancel / no candidates)
//! ```
//!
//! `Held` is the transient two-phase claim a channel takes inside its
//! critical section between Accept and Commit. It is invisible in the
//! public lifecycle: observers either see the offer still probing, already
//! committed, or withdrawn. Channels observing `Held` spin briefly; hold
//! windows are bounded because holders run no user code before deciding.
//!
//! Holds are acquired in global `order_key` order when a pairing needs two
//! offers, so no hold cycle can form and the protocol cannot deadlock.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::channel::ChannelId;
use crate::error::{Error, ErrorKind};

const PROBING: u8 = 0;
const HELD: u8 = 1;
const COMMITTED: u8 = 2;
const WITHDRAWN: u8 = 3;

static ORDER: AtomicU64 = AtomicU64::new(1);

/// Outcome of a hold attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HoldResult {
    /// The caller now holds the offer and must commit or release it.
    Acquired,
    /// Another channel holds the offer right now; retry shortly.
    Busy,
    /// The offer is committed or withdrawn; drop this candidate.
    Unavailable,
}

/// Hook run exactly once when the offer commits.
pub(crate) type CommitHook = Box<dyn FnOnce() + Send>;
/// Hook run exactly once when the offer withdraws, carrying the failure.
pub(crate) type AbortHook = Box<dyn FnOnce(Error) + Send>;

/// Shared arbiter enforcing at-most-one commit across an alt's requests.
#[derive(Debug)]
pub struct Offer {
    state: std::sync::atomic::AtomicU8,
    order_key: u64,
    winner: AtomicU64,
    /// Number of candidacies currently queued on channels.
    live: AtomicUsize,
    /// Set once the engine has posted every request.
    probe_complete: AtomicBool,
    /// First non-retired failure observed among evaporated candidates.
    failure: Mutex<Option<ErrorKind>>,
    hooks: Mutex<Hooks>,
}

struct Hooks {
    on_commit: Option<CommitHook>,
    on_abort: Option<AbortHook>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("on_commit", &self.on_commit.is_some())
            .field("on_abort", &self.on_abort.is_some())
            .finish()
    }
}

impl Offer {
    /// Creates a fresh offer in the probing state.
    pub(crate) fn new(on_commit: Option<CommitHook>, on_abort: AbortHook) -> Arc<Self> {
        Arc::new(Self {
            state: std::sync::atomic::AtomicU8::new(PROBING),
            order_key: ORDER.fetch_add(1, Ordering::Relaxed),
            winner: AtomicU64::new(0),
            live: AtomicUsize::new(0),
            probe_complete: AtomicBool::new(false),
            failure: Mutex::new(None),
            hooks: Mutex::new(Hooks {
                on_commit,
                on_abort: Some(on_abort),
            }),
        })
    }

    /// Stable key for deadlock-free ordered hold acquisition.
    pub(crate) fn order_key(&self) -> u64 {
        self.order_key
    }

    /// Attempts the two-phase Accept: `Probing → Held`.
    pub(crate) fn try_hold(&self) -> HoldResult {
        match self
            .state
            .compare_exchange(PROBING, HELD, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => HoldResult::Acquired,
            Err(HELD) => HoldResult::Busy,
            Err(_) => HoldResult::Unavailable,
        }
    }

    /// Releases a hold after the counterpart side declined: `Held → Probing`.
    pub(crate) fn release_hold(&self) {
        let released = self
            .state
            .compare_exchange(HELD, PROBING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        debug_assert!(released, "release_hold without a hold");
    }

    /// Finalizes a held offer: `Held → Committed`, recording the winner.
    ///
    /// The commit hook is run separately via [`Offer::run_commit_hook`]:
    /// deliveries flip every state in a batch before running any hook, so
    /// a hook that re-enters a channel can never find a sibling offer of
    /// a decided pairing still transiently held.
    pub(crate) fn commit_state(&self, winner: ChannelId) -> bool {
        let committed = self
            .state
            .compare_exchange(HELD, COMMITTED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        debug_assert!(committed, "commit without a hold");
        if committed {
            self.winner.store(winner.raw(), Ordering::SeqCst);
        }
        committed
    }

    /// Runs the commit hook, at most once.
    pub(crate) fn run_commit_hook(&self) {
        let hook = {
            let mut hooks = self.hooks.lock().expect("offer hooks lock poisoned");
            hooks.on_commit.take()
        };
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Withdraws a probing offer: `Probing → Withdrawn`. Runs the abort
    /// hook with an error of the given kind. Spins through transient holds;
    /// a committed offer is left untouched and `false` is returned.
    pub(crate) fn withdraw(&self, kind: ErrorKind) -> bool {
        loop {
            match self.state.compare_exchange(
                PROBING,
                WITHDRAWN,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    let hook = {
                        let mut hooks = self.hooks.lock().expect("offer hooks lock poisoned");
                        hooks.on_abort.take()
                    };
                    if let Some(hook) = hook {
                        hook(Error::new(kind));
                    }
                    return true;
                }
                // A channel is mid-pairing; it will commit or release.
                Err(HELD) => std::thread::yield_now(),
                Err(_) => return false,
            }
        }
    }

    /// Returns true once the offer is committed or withdrawn.
    pub(crate) fn is_decided(&self) -> bool {
        matches!(self.state.load(Ordering::SeqCst), COMMITTED | WITHDRAWN)
    }

    /// Returns true if the offer committed.
    pub(crate) fn is_committed(&self) -> bool {
        self.state.load(Ordering::SeqCst) == COMMITTED
    }

    /// The channel that won the commit, if any.
    pub(crate) fn winner(&self) -> Option<ChannelId> {
        if self.is_committed() {
            Some(ChannelId::from_raw(self.winner.load(Ordering::SeqCst)))
        } else {
            None
        }
    }

    /// A candidacy was queued on a channel.
    pub(crate) fn candidate_enqueued(&self) {
        self.live.fetch_add(1, Ordering::SeqCst);
    }

    /// A queued candidacy evaporated (eviction or retirement). When the
    /// last one goes after the probe phase completed, the offer withdraws
    /// itself with the aggregated failure kind.
    pub(crate) fn candidate_gone(&self, kind: ErrorKind) {
        self.note_failure(kind);
        let previous = self.live.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "candidate accounting underflow");
        if previous == 1 && self.probe_complete.load(Ordering::SeqCst) {
            self.withdraw(self.failure_kind());
        }
    }

    /// A request was refused before it was ever queued (channel already
    /// retired). Only the failure kind is recorded; `mark_probe_complete`
    /// settles the offer if nothing was queued at all.
    pub(crate) fn candidate_refused(&self, kind: ErrorKind) {
        self.note_failure(kind);
    }

    /// Marks the probe phase complete. If every candidate was refused or
    /// already evaporated, the offer withdraws with the aggregated kind.
    pub(crate) fn mark_probe_complete(&self) {
        self.probe_complete.store(true, Ordering::SeqCst);
        if self.live.load(Ordering::SeqCst) == 0 {
            self.withdraw(self.failure_kind());
        }
    }

    /// First non-retired failure wins; a pure retirement storm reports
    /// `Retired`.
    fn note_failure(&self, kind: ErrorKind) {
        let mut failure = self.failure.lock().expect("offer failure lock poisoned");
        match *failure {
            None => *failure = Some(kind),
            Some(ErrorKind::Retired) if kind != ErrorKind::Retired => *failure = Some(kind),
            Some(_) => {}
        }
    }

    fn failure_kind(&self) -> ErrorKind {
        self.failure
            .lock()
            .expect("offer failure lock poisoned")
            .unwrap_or(ErrorKind::Retired)
    }
}
