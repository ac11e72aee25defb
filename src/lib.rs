//! Alting: CSP-style channels with two-phase offers and multi-channel
//! alternation.
//!
//! # Overview
//!
//! Concurrent activities in Alting communicate exclusively by exchanging
//! typed messages over first-class channels; there is no shared mutable
//! state beyond what the channels encapsulate. The heart of the library is
//! the rendezvous engine: channels pair readers with writers under a
//! per-channel lock, and an atomic offer arbiter lets one activity present
//! a unified "take one of N" intent to many channels and commit on exactly
//! one — however many pairings, deadlines and cancellations race.
//!
//! # Core Guarantees
//!
//! - **Exactly-once commit**: every alternation resolves as exactly one of
//!   a commit, a timeout, a cancellation, or retirement
//! - **FIFO per channel**: readers and writers pair in queue order unless
//!   offer arbitration skips a request that committed elsewhere
//! - **No lost values**: a losing alternation candidate leaves its channel
//!   untouched; buffered values survive timeouts
//! - **Cooperative retirement**: channels drain what can still pair, fail
//!   the rest, and retire idempotently
//! - **Callbacks outside locks**: commit hooks and completers never run
//!   under a channel lock
//!
//! # Module Structure
//!
//! - [`channel`]: typed rendezvous channels, buffering, overflow, retirement
//! - [`alt`]: multi-channel alternation with Any/First/Random/Fair priorities
//! - [`offer`]: the two-phase offer arbiter behind both
//! - [`completion`]: one-shot completer slots (blocking + `Future`)
//! - [`cancel`]: one-shot cancellation tokens
//! - [`time`]: deadline representation
//! - [`registry`]: named-channel lookup in nested scopes
//! - [`exec`]: executor contract and a capped thread pool
//! - [`error`]: error taxonomy
//!
//! # Example
//!
//! ```ignore
//! use alting::{read_any, Channel, Deadline, Priority};
//! use std::time::Duration;
//!
//! let jobs = Channel::<u32>::buffered(8);
//! let control = Channel::<u32>::rendezvous();
//!
//! jobs.write(1).wait()?;
//! let (value, winner) = read_any(
//!     &[control.clone(), jobs.clone()],
//!     Priority::First,
//!     Deadline::after(Duration::from_secs(1)),
//! )?;
//! assert_eq!((value, winner), (1, jobs.id()));
//! # Ok::<(), alting::Error>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod alt;
pub mod cancel;
pub mod channel;
pub mod completion;
pub mod error;
pub mod exec;
pub mod offer;
pub mod registry;
pub mod test_utils;
pub mod time;

mod timer;
mod util;

// Re-exports for convenient access to core types
pub use alt::{
    read_any, read_or_write_any, select, write_any, Alt, AltOp, AltRequest, Priority, ReadSet,
    Selection, SelectionKind, WriteSet,
};
pub use cancel::CancelToken;
pub use channel::{
    Channel, ChannelBuilder, ChannelId, ChannelProbe, Lifecycle, Op, Overflow, TryReadError,
    TryWriteError,
};
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use exec::{Executor, ThreadPool};
pub use registry::{RegistryError, Scope};
pub use time::Deadline;
