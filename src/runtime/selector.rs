//! Readiness selection over a bounded set of descriptors.
//!
//! A `Selector` is driven in cycles: `wait` blocks until at least one
//! registered descriptor is ready, then `next_ready` hands out each ready
//! descriptor once. `remove_current` retracts the descriptor most recently
//! returned by `next_ready`, so it is never reported again.

use crate::error::Result;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Readiness flags reported for a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness(u8);

impl Readiness {
    pub const READABLE: Readiness = Readiness(0b0_0001);
    pub const WRITABLE: Readiness = Readiness(0b0_0010);
    pub const HANGUP: Readiness = Readiness(0b0_0100);
    pub const ERROR: Readiness = Readiness(0b0_1000);
    /// Descriptor was not open (poll's `POLLNVAL`).
    pub const INVALID: Readiness = Readiness(0b1_0000);

    pub const fn empty() -> Self {
        Readiness(0)
    }

    pub const fn contains(self, other: Readiness) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn is_readable(self) -> bool {
        self.contains(Self::READABLE)
    }

    pub fn is_hangup(self) -> bool {
        self.contains(Self::HANGUP)
    }

    pub fn is_error(self) -> bool {
        self.contains(Self::ERROR)
    }

    pub fn is_invalid(self) -> bool {
        self.contains(Self::INVALID)
    }
}

impl std::ops::BitOr for Readiness {
    type Output = Readiness;

    fn bitor(self, rhs: Readiness) -> Readiness {
        Readiness(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Readiness {
    fn bitor_assign(&mut self, rhs: Readiness) {
        self.0 |= rhs.0;
    }
}

/// One ready descriptor produced by [`Selector::next_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    /// Registration slot returned by [`Selector::add`].
    pub token: usize,
    pub fd: RawFd,
    pub readiness: Readiness,
}

/// Which backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Level-triggered `poll(2)` over a fixed array.
    Poll,
    /// Edge-triggered event notification (epoll on Linux, kqueue on macOS).
    ///
    /// mio has no level-triggered mode, so this backend is edge-only:
    /// callers must drain a descriptor until it would block.
    Event,
}

/// Readiness selection over raw descriptors.
///
/// The trigger mode is fixed by the backend rather than chosen per
/// registration: [`Backend::Poll`] is level-triggered and
/// [`Backend::Event`] is edge-triggered.
pub trait Selector: Send {
    /// Register `fd` for read readiness. Returns the registration slot.
    fn add(&mut self, fd: RawFd) -> Result<usize>;

    /// Block for readiness. `None` blocks until something is ready.
    ///
    /// Returns `Ok(false)` when the wait timed out or was interrupted
    /// without any ready descriptor; the ready sequence is then empty.
    fn wait(&mut self, timeout: Option<Duration>) -> Result<bool>;

    /// Next ready descriptor of the current wait cycle.
    fn next_ready(&mut self) -> Option<Ready>;

    /// Retract the descriptor last returned by `next_ready`.
    ///
    /// Only valid between that `next_ready` call and the following `wait`.
    fn remove_current(&mut self) -> Result<()>;

    /// Number of live registrations.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Construct a selector of the given backend sized for `capacity` descriptors.
pub fn build(backend: Backend, capacity: usize) -> Result<Box<dyn Selector>> {
    match backend {
        Backend::Poll => Ok(Box::new(super::PollSelector::new(capacity))),
        Backend::Event => Ok(Box::new(super::EventSelector::new(capacity)?)),
    }
}

pub(crate) fn no_current() -> crate::error::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        "remove_current called without a current descriptor",
    )
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_flags() {
        let r = Readiness::READABLE | Readiness::HANGUP;
        assert!(r.is_readable());
        assert!(r.is_hangup());
        assert!(!r.is_error());
        assert!(!r.is_invalid());
        assert!(Readiness::empty().is_empty());
        assert!(!Readiness::empty().contains(Readiness::empty()));
    }
}
