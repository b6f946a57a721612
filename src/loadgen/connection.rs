//! Per-connection state owned by one load generator worker.
//!
//! Each connection carries its own receive buffer so a message split
//! across several edge-triggered wakeups is reassembled before it is
//! echoed, plus the instant of its last echo for latency accounting.

use super::histogram::RunResult;
use crate::error::{Error, Result};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Instant;

/// Payload byte used for the priming message.
pub const FILL_BYTE: u8 = b'X';

/// A connected, non-blocking byte stream a worker can multiplex.
pub trait Transport: Read + Write + AsRawFd + Send + 'static {}

impl<T: Read + Write + AsRawFd + Send + 'static> Transport for T {}

/// Whether a connection is still usable after draining it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Open,
    /// Peer closed or reset; deregister and drop.
    Closed,
}

#[derive(Debug)]
pub struct Connection<S = TcpStream> {
    stream: S,
    buf: Vec<u8>,
    /// Bytes of the current message received so far.
    filled: usize,
    /// When this connection last wrote an echo. `None` until the first
    /// round trip completes.
    last_echo: Option<Instant>,
    round_trips: u64,
}

impl<S: Transport> Connection<S> {
    pub fn new(stream: S, message_size: usize) -> Self {
        Self {
            stream,
            buf: vec![FILL_BYTE; message_size],
            filled: 0,
            last_echo: None,
            round_trips: 0,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    /// Messages echoed on this connection so far.
    pub fn round_trips(&self) -> u64 {
        self.round_trips
    }

    /// Send the first message that starts the ping-pong.
    pub fn prime(&mut self) -> Result<()> {
        self.buf.fill(FILL_BYTE);
        self.send()
    }

    /// Read everything currently available, echoing each complete message.
    ///
    /// Every completed message counts as a round trip; all but the first on
    /// this connection also record the time since the previous echo.
    pub fn drain(&mut self, result: &mut RunResult) -> Result<Progress> {
        loop {
            let n = match self.stream.read(&mut self.buf[self.filled..]) {
                Ok(0) => return Ok(Progress::Closed),
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Progress::Open),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    return Ok(Progress::Closed)
                }
                Err(e) => return Err(e.into()),
            };

            self.filled += n;
            if self.filled < self.buf.len() {
                continue;
            }

            let now = Instant::now();
            if let Some(prev) = self.last_echo {
                let elapsed = now.duration_since(prev).as_nanos();
                result.histogram.record(u64::try_from(elapsed).unwrap_or(u64::MAX));
            }
            result.round_trips += 1;
            self.round_trips += 1;
            self.filled = 0;

            match self.send() {
                Ok(()) => {}
                Err(Error::Io(ref e))
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe
                    ) =>
                {
                    return Ok(Progress::Closed)
                }
                Err(e) => return Err(e),
            }
            self.last_echo = Some(Instant::now());
        }
    }

    /// Write the whole buffer in a single call.
    fn send(&mut self) -> Result<()> {
        let expected = self.buf.len();
        let written = match self.stream.write(&self.buf) {
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) => return Err(e.into()),
        };
        if written != expected {
            return Err(Error::ProtocolViolation {
                expected,
                actual: written,
            });
        }
        Ok(())
    }
}
