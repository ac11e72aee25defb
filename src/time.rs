//! Deadline representation for channel and alternation requests.
//!
//! A [`Deadline`] is an absolute wall-clock instant, with [`Deadline::Never`]
//! standing in for "no deadline". Relative timeouts are converted at request
//! construction time so that every request races one fixed instant,
//! regardless of how long posting takes.

use std::time::{Duration, Instant};

/// An absolute point in time by which a request must commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// No deadline; the request waits indefinitely.
    Never,
    /// The request fails with `Timeout` once this instant passes.
    At(Instant),
}

impl Deadline {
    /// A deadline that never arrives.
    #[must_use]
    pub const fn never() -> Self {
        Self::Never
    }

    /// A deadline at a specific instant.
    #[must_use]
    pub const fn at(instant: Instant) -> Self {
        Self::At(instant)
    }

    /// A deadline `timeout` from now.
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self::At(Instant::now() + timeout)
    }

    /// Returns true if the deadline has passed.
    #[must_use]
    pub fn is_elapsed(&self) -> bool {
        match self {
            Self::Never => false,
            Self::At(at) => *at <= Instant::now(),
        }
    }

    /// Returns the underlying instant, if any.
    #[must_use]
    pub const fn instant(&self) -> Option<Instant> {
        match self {
            Self::Never => None,
            Self::At(at) => Some(*at),
        }
    }

    /// Time remaining until the deadline. `None` means no deadline; an
    /// elapsed deadline reports a zero duration.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::At(at) => Some(at.saturating_duration_since(Instant::now())),
        }
    }

    /// The earlier of two deadlines. `Never` is later than everything.
    #[must_use]
    pub fn earlier_of(self, other: Self) -> Self {
        match (self, other) {
            (Self::Never, d) | (d, Self::Never) => d,
            (Self::At(a), Self::At(b)) => Self::At(a.min(b)),
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::Never
    }
}

impl From<Duration> for Deadline {
    fn from(timeout: Duration) -> Self {
        Self::after(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_is_never_elapsed() {
        assert!(!Deadline::never().is_elapsed());
        assert!(Deadline::never().remaining().is_none());
        assert!(Deadline::never().instant().is_none());
    }

    #[test]
    fn past_instant_is_elapsed() {
        let d = Deadline::at(Instant::now() - Duration::from_millis(1));
        assert!(d.is_elapsed());
        assert_eq!(d.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn after_is_in_the_future() {
        let d = Deadline::after(Duration::from_secs(60));
        assert!(!d.is_elapsed());
        let remaining = d.remaining().expect("deadline has an instant");
        assert!(remaining > Duration::from_secs(59));
    }

    #[test]
    fn earlier_of_prefers_the_sooner_instant() {
        let now = Instant::now();
        let near = Deadline::at(now + Duration::from_secs(1));
        let far = Deadline::at(now + Duration::from_secs(10));
        assert_eq!(near.earlier_of(far), near);
        assert_eq!(far.earlier_of(near), near);
        assert_eq!(Deadline::never().earlier_of(near), near);
        assert_eq!(near.earlier_of(Deadline::never()), near);
        assert_eq!(
            Deadline::never().earlier_of(Deadline::never()),
            Deadline::never()
        );
    }

    #[test]
    fn duration_converts_to_deadline() {
        let d: Deadline = Duration::from_secs(5).into();
        assert!(!d.is_elapsed());
    }
}
