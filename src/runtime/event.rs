//! Edge-triggered selector backed by mio (epoll on Linux, kqueue on macOS).
//!
//! Readiness is reported on state transitions only, so callers must drain
//! a descriptor before the next `wait` or they will not hear about it again.
//! There is no level-triggered mode; use `PollSelector` for that.
//! Descriptors are registered through `SourceFd`; the selector never owns
//! them and the caller must keep them open until they are removed.

use super::selector::{no_current, Readiness, Ready, Selector};
use crate::error::{Error, Result};
use mio::event::Event;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use slab::Slab;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub struct EventSelector {
    poll: Poll,
    events: Events,
    /// Registered descriptors, keyed by token.
    fds: Slab<RawFd>,
    /// Ready descriptors collected by the last `wait`.
    ready: Vec<Ready>,
    cursor: usize,
    current: Option<usize>,
}

impl EventSelector {
    /// Create a selector whose ready-event buffer holds `capacity` events.
    pub fn new(capacity: usize) -> Result<Self> {
        let poll = Poll::new().map_err(|e| Error::socket("event selector create", e))?;
        Ok(Self {
            poll,
            events: Events::with_capacity(capacity.max(1)),
            fds: Slab::with_capacity(capacity),
            ready: Vec::with_capacity(capacity),
            cursor: 0,
            current: None,
        })
    }
}

fn readiness(event: &Event) -> Readiness {
    let mut r = Readiness::empty();
    if event.is_readable() {
        r |= Readiness::READABLE;
    }
    if event.is_writable() {
        r |= Readiness::WRITABLE;
    }
    if event.is_read_closed() || event.is_write_closed() {
        r |= Readiness::HANGUP;
    }
    if event.is_error() {
        r |= Readiness::ERROR;
    }
    r
}

impl Selector for EventSelector {
    fn add(&mut self, fd: RawFd) -> Result<usize> {
        let token = self.fds.vacant_key();
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), Token(token), Interest::READABLE)?;
        self.fds.insert(fd);
        Ok(token)
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<bool> {
        self.ready.clear();
        self.cursor = 0;
        self.current = None;

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        for event in self.events.iter() {
            let token = event.token().0;
            if let Some(&fd) = self.fds.get(token) {
                self.ready.push(Ready {
                    token,
                    fd,
                    readiness: readiness(event),
                });
            }
        }
        Ok(!self.ready.is_empty())
    }

    fn next_ready(&mut self) -> Option<Ready> {
        let ready = self.ready.get(self.cursor).copied()?;
        self.cursor += 1;
        self.current = Some(ready.token);
        Some(ready)
    }

    fn remove_current(&mut self) -> Result<()> {
        let token = self.current.take().ok_or_else(no_current)?;
        let fd = self.fds.try_remove(token).ok_or_else(no_current)?;
        self.poll.registry().deregister(&mut SourceFd(&fd))?;
        Ok(())
    }

    fn len(&self) -> usize {
        self.fds.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_timeout_without_activity() {
        let (a, _b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        let mut selector = EventSelector::new(4).unwrap();
        selector.add(a.as_raw_fd()).unwrap();

        assert!(!selector.wait(Some(Duration::from_millis(10))).unwrap());
        assert!(selector.next_ready().is_none());
    }

    #[test]
    fn test_edge_reported_once() {
        let (a, mut b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        let mut selector = EventSelector::new(4).unwrap();
        let token = selector.add(a.as_raw_fd()).unwrap();

        b.write_all(b"ping").unwrap();
        assert!(selector.wait(Some(Duration::from_secs(1))).unwrap());
        let ready = selector.next_ready().unwrap();
        assert_eq!(ready.token, token);
        assert!(ready.readiness.is_readable());
        assert!(selector.next_ready().is_none());

        // Undrained data does not produce a second edge.
        assert!(!selector.wait(Some(Duration::from_millis(10))).unwrap());
    }

    #[test]
    fn test_remove_current_requires_next() {
        let mut selector = EventSelector::new(1).unwrap();
        assert!(selector.remove_current().is_err());
    }
}
