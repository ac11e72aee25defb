//! Typed rendezvous channels.
//!
//! A [`Channel<T>`] is a rendezvous point holding three ordered queues:
//! buffered values, pending readers, and pending writers. Every mutating
//! operation runs the matchmaking loop, which pairs the head writer (or
//! head buffered value) with the head reader, consulting each side's offer
//! arbiter before committing. Requests that lost their offer to another
//! channel are detected by a declined hold and silently dropped.
//!
//! # Queues and buffering
//!
//! ```text
//!   writers ──► [ buffer (≤ capacity) ] ──► readers
//!
//!   capacity = 0: writers pair with readers directly (rendezvous)
//!   capacity > 0: a lone writer commits against a free slot,
//!                 a lone reader commits against a buffered value
//! ```
//!
//! # Retirement
//!
//! Channels retire cooperatively: `retire()` drains what can still pair
//! and fails the rest with `Retired`; `retire_immediate()` fails
//! everything at once. Both are idempotent, and `Retired` is terminal.
//!
//! # Handles
//!
//! `Channel<T>` is a cheap clonable handle; all clones address the same
//! rendezvous point. Operations return an [`Op`] that can be awaited or
//! blocked on.

mod chan;
mod op;

pub use chan::{Channel, ChannelBuilder, ChannelProbe, TryReadError, TryWriteError};
pub use op::Op;

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique identity of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw numeric id.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Accepting requests and pairing normally.
    Open,
    /// Draining: new requests are refused, queued work may still complete.
    Retiring,
    /// Terminal: all queues empty, every request fails with `Retired`.
    Retired,
}

/// Policy applied when a pending queue would exceed its cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Overflow {
    /// Fail the new request with `Overflow`.
    #[default]
    Reject,
    /// Evict the newest queued request and admit the new one.
    Lifo,
    /// Evict the oldest queued request and admit the new one.
    Fifo,
}
