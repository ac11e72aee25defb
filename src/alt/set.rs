//! Channel sets: stable containers carrying the Fair cursor.
//!
//! `Fair` priority needs state that outlives a single alternation: the
//! round-robin cursor. A [`ReadSet`] or [`WriteSet`] owns an ordered list
//! of channels plus that cursor; each alt starts posting at the cursor and
//! wraps, and a commit advances the cursor past the winner. The other
//! priorities work through sets too, without touching the cursor.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::cancel::CancelToken;
use crate::channel::{Channel, ChannelId};
use crate::error::{Error, Result};
use crate::time::Deadline;
use crate::util::Rng;

use super::engine::{post_ordered, AltRequest};
use super::{Priority, SelectionKind};

fn rotated_order(len: usize, start: usize) -> Vec<usize> {
    (0..len).map(|i| (start + i) % len).collect()
}

fn set_order(priority: Priority, len: usize, cursor: &AtomicUsize) -> Vec<usize> {
    match priority {
        Priority::First | Priority::Any => (0..len).collect(),
        Priority::Random => {
            let mut order: Vec<usize> = (0..len).collect();
            Rng::from_entropy().shuffle(&mut order);
            order
        }
        Priority::Fair => rotated_order(len, cursor.load(Ordering::Relaxed) % len),
    }
}

fn advance_cursor(priority: Priority, cursor: &AtomicUsize, winner: usize, len: usize) {
    if priority == Priority::Fair {
        cursor.store((winner + 1) % len, Ordering::Relaxed);
    }
}

/// An ordered set of channels to read from.
#[derive(Debug)]
pub struct ReadSet<T> {
    channels: Vec<Channel<T>>,
    priority: Priority,
    cursor: AtomicUsize,
}

impl<T: Send + 'static> ReadSet<T> {
    /// Builds a read set with the given selection policy.
    #[must_use]
    pub fn new(channels: Vec<Channel<T>>, priority: Priority) -> Self {
        Self {
            channels,
            priority,
            cursor: AtomicUsize::new(0),
        }
    }

    /// The channels in set order.
    #[must_use]
    pub fn channels(&self) -> &[Channel<T>] {
        &self.channels
    }

    /// Number of channels in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Returns true if the set holds no channels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Reads one value from whichever member commits first.
    pub fn read(&self) -> Result<(T, ChannelId)> {
        self.read_request(Deadline::never(), None)
    }

    /// As [`ReadSet::read`], bounded by a deadline.
    pub fn read_before(&self, deadline: Deadline) -> Result<(T, ChannelId)> {
        self.read_request(deadline, None)
    }

    /// As [`ReadSet::read`], with a deadline and a cancellation signal.
    pub fn read_request(
        &self,
        deadline: Deadline,
        cancel: Option<&CancelToken>,
    ) -> Result<(T, ChannelId)> {
        let len = self.channels.len();
        if len == 0 {
            return Err(Error::invalid("empty channel set"));
        }
        let order = set_order(self.priority, len, &self.cursor);
        let requests = self.channels.iter().map(AltRequest::read).collect();
        let selection = post_ordered(requests, order, deadline, cancel, None)?.wait()?;
        advance_cursor(self.priority, &self.cursor, selection.index, len);
        let SelectionKind::Read(payload) = selection.kind else {
            unreachable!("read set completed as a write")
        };
        let value = *payload
            .downcast::<T>()
            .expect("set payload matches channel payload type");
        Ok((value, selection.channel))
    }
}

/// An ordered set of channels to write to.
#[derive(Debug)]
pub struct WriteSet<T> {
    channels: Vec<Channel<T>>,
    priority: Priority,
    cursor: AtomicUsize,
}

impl<T: Clone + Send + 'static> WriteSet<T> {
    /// Builds a write set with the given selection policy.
    #[must_use]
    pub fn new(channels: Vec<Channel<T>>, priority: Priority) -> Self {
        Self {
            channels,
            priority,
            cursor: AtomicUsize::new(0),
        }
    }

    /// The channels in set order.
    #[must_use]
    pub fn channels(&self) -> &[Channel<T>] {
        &self.channels
    }

    /// Number of channels in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Returns true if the set holds no channels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Writes one clone of `value` to whichever member commits first.
    pub fn write(&self, value: &T) -> Result<ChannelId> {
        self.write_request(value, Deadline::never(), None)
    }

    /// As [`WriteSet::write`], bounded by a deadline.
    pub fn write_before(&self, value: &T, deadline: Deadline) -> Result<ChannelId> {
        self.write_request(value, deadline, None)
    }

    /// As [`WriteSet::write`], with a deadline and a cancellation signal.
    pub fn write_request(
        &self,
        value: &T,
        deadline: Deadline,
        cancel: Option<&CancelToken>,
    ) -> Result<ChannelId> {
        let len = self.channels.len();
        if len == 0 {
            return Err(Error::invalid("empty channel set"));
        }
        let order = set_order(self.priority, len, &self.cursor);
        let requests = self
            .channels
            .iter()
            .map(|chan| AltRequest::write(chan, value.clone()))
            .collect();
        let selection = post_ordered(requests, order, deadline, cancel, None)?.wait()?;
        advance_cursor(self.priority, &self.cursor, selection.index, len);
        Ok(selection.channel)
    }
}
