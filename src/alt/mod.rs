//! Multi-channel alternation.
//!
//! An alternation ("alt") offers a set of read and write requests to their
//! channels and commits exactly one. All requests share one offer arbiter,
//! so however many channels race, a single pairing wins; the rest are
//! rescinded. The outcome identifies the winning request and channel.
//!
//! # Priorities
//!
//! - [`Priority::First`] — requests are offered in caller order; a channel
//!   that is already satisfiable at post time wins over later channels.
//!   This is a preference, not a guarantee, under contention.
//! - [`Priority::Any`] — a documented synonym of `First`: the library may
//!   reorder but currently never does. Use it to state indifference.
//! - [`Priority::Random`] — a uniform shuffle of the request order per alt.
//! - [`Priority::Fair`] — round-robin via a persistent cursor; only
//!   available through [`ReadSet`]/[`WriteSet`], which carry the cursor.
//!
//! # Building an alt
//!
//! ```ignore
//! use alting::{Alt, Channel, Deadline, Priority};
//!
//! let a = Channel::<u32>::rendezvous();
//! let b = Channel::<String>::buffered(4);
//!
//! let selection = Alt::new()
//!     .read(&a)
//!     .write(&b, "ping".to_owned())
//!     .priority(Priority::Random)
//!     .deadline(Deadline::after(std::time::Duration::from_secs(1)))
//!     .wait()?;
//! # Ok::<(), alting::Error>(())
//! ```
//!
//! Reads from mixed payload types cross as `Box<dyn Any + Send>` inside
//! [`SelectionKind::Read`]; homogeneous helpers ([`read_any`]) downcast
//! back to `T` internally.

mod engine;
mod set;

pub use engine::{read_any, read_or_write_any, select, write_any, Alt, AltOp, AltRequest};
pub use set::{ReadSet, WriteSet};

use std::any::Any;

use crate::channel::ChannelId;

/// Selection policy across an alt's candidate requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// No preference; currently identical to `First`.
    Any,
    /// Caller order.
    #[default]
    First,
    /// Uniformly shuffled order per alt.
    Random,
    /// Round-robin with a persistent cursor; requires a channel set.
    Fair,
}

/// The committed outcome of an alternation.
pub struct Selection {
    /// Position of the winning request in the caller's original order.
    pub index: usize,
    /// Identity of the winning channel.
    pub channel: ChannelId,
    /// What committed: a read carrying its value, or a completed write.
    pub kind: SelectionKind,
}

/// Payload of a [`Selection`].
pub enum SelectionKind {
    /// A read committed; the value is erased over the channel's payload
    /// type and can be recovered with [`Selection::into_value`].
    Read(Box<dyn Any + Send>),
    /// A write committed.
    Wrote,
}

impl Selection {
    /// Returns true if a read committed.
    #[must_use]
    pub fn is_read(&self) -> bool {
        matches!(self.kind, SelectionKind::Read(_))
    }

    /// Returns true if a write committed.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(self.kind, SelectionKind::Wrote)
    }

    /// Recovers the read value, if this selection is a read of type `T`.
    #[must_use]
    pub fn into_value<T: 'static>(self) -> Option<T> {
        match self.kind {
            SelectionKind::Read(payload) => payload.downcast::<T>().ok().map(|value| *value),
            SelectionKind::Wrote => None,
        }
    }
}

impl std::fmt::Debug for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selection")
            .field("index", &self.index)
            .field("channel", &self.channel)
            .field("kind", &self.kind)
            .finish()
    }
}

impl std::fmt::Debug for SelectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read(_) => f.write_str("Read(..)"),
            Self::Wrote => f.write_str("Wrote"),
        }
    }
}
