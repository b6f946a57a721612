//! One fixed-size echo round trip.

use crate::error::{Error, Result};
use std::io::{self, Read, Write};

/// Result of a single [`serve_once`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A full message was read and written back.
    Echoed,
    /// Non-blocking socket had nothing to read.
    Idle,
    /// Peer closed or reset the connection.
    Closed,
}

fn is_disconnect(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionAborted
    )
}

/// Read exactly `buf.len()` bytes in one call and write them back in one call.
///
/// A read or write that moves a different number of bytes is a
/// [`Error::ProtocolViolation`]; the message size is fixed, so no partial
/// message is carried over to the next call.
pub fn serve_once<S: Read + Write>(conn: &mut S, buf: &mut [u8]) -> Result<Outcome> {
    let expected = buf.len();

    let n = match conn.read(buf) {
        Ok(0) => return Ok(Outcome::Closed),
        Ok(n) => n,
        Err(ref e) if is_disconnect(e.kind()) => return Ok(Outcome::Closed),
        Err(ref e)
            if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted =>
        {
            return Ok(Outcome::Idle)
        }
        Err(e) => return Err(e.into()),
    };
    if n != expected {
        return Err(Error::ProtocolViolation {
            expected,
            actual: n,
        });
    }

    let written = match conn.write(buf) {
        Ok(n) => n,
        Err(ref e) if is_disconnect(e.kind()) => return Ok(Outcome::Closed),
        Err(e) => return Err(e.into()),
    };
    if written != expected {
        return Err(Error::ProtocolViolation {
            expected,
            actual: written,
        });
    }

    Ok(Outcome::Echoed)
}
