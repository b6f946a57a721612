//! Level-triggered selector backed by `poll(2)`.
//!
//! Registrations live in a fixed-capacity `pollfd` array. Removal writes
//! the `-1` sentinel into the slot, which `poll(2)` ignores; the array is
//! never compacted, so slots stay stable for the selector's lifetime.

use super::selector::{no_current, Readiness, Ready, Selector};
use crate::error::{Error, Result};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;
use tracing::trace;

const REMOVED: RawFd = -1;

pub struct PollSelector {
    fds: Vec<libc::pollfd>,
    capacity: usize,
    /// Next slot to scan in the current cycle.
    cursor: usize,
    current: Option<usize>,
    live: usize,
}

impl PollSelector {
    pub fn new(capacity: usize) -> Self {
        Self {
            fds: Vec::with_capacity(capacity),
            capacity,
            cursor: 0,
            current: None,
            live: 0,
        }
    }

    /// Descriptor registered in `slot`, or `None` once removed.
    pub fn slot(&self, slot: usize) -> Option<RawFd> {
        self.fds
            .get(slot)
            .map(|p| p.fd)
            .filter(|&fd| fd != REMOVED)
    }
}

fn readiness(revents: libc::c_short) -> Readiness {
    let mut r = Readiness::empty();
    if revents & libc::POLLIN != 0 {
        r |= Readiness::READABLE;
    }
    if revents & libc::POLLOUT != 0 {
        r |= Readiness::WRITABLE;
    }
    if revents & libc::POLLHUP != 0 {
        r |= Readiness::HANGUP;
    }
    if revents & libc::POLLERR != 0 {
        r |= Readiness::ERROR;
    }
    if revents & libc::POLLNVAL != 0 {
        r |= Readiness::INVALID;
    }
    r
}

fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
    }
}

impl Selector for PollSelector {
    fn add(&mut self, fd: RawFd) -> Result<usize> {
        if self.fds.len() >= self.capacity {
            return Err(Error::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        self.fds.push(libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        });
        self.live += 1;
        Ok(self.fds.len() - 1)
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<bool> {
        self.current = None;
        // Nothing is reported until a successful poll resets the cursor.
        self.cursor = self.fds.len();

        let rv = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_ms(timeout),
            )
        };
        if rv < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err.into());
        }

        trace!(ready = rv, "poll returned");
        if rv == 0 {
            return Ok(false);
        }
        self.cursor = 0;
        Ok(true)
    }

    fn next_ready(&mut self) -> Option<Ready> {
        while self.cursor < self.fds.len() {
            let slot = self.cursor;
            self.cursor += 1;

            let entry = &self.fds[slot];
            if entry.fd == REMOVED || entry.revents == 0 {
                continue;
            }
            self.current = Some(slot);
            return Some(Ready {
                token: slot,
                fd: entry.fd,
                readiness: readiness(entry.revents),
            });
        }
        None
    }

    fn remove_current(&mut self) -> Result<()> {
        let slot = self.current.take().ok_or_else(no_current)?;
        let entry = &mut self.fds[slot];
        entry.fd = REMOVED;
        entry.revents = 0;
        self.live -= 1;
        Ok(())
    }

    fn len(&self) -> usize {
        self.live
    }
}
