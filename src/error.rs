//! Error taxonomy shared by the selectors, the load generator and the
//! control endpoint.
//!
//! Peer reset and orderly close are not errors; they surface as session
//! outcomes instead (see [`crate::runtime::Outcome`]).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Socket create/bind/listen/accept/connect failure. Fatal to the run.
    #[error("socket error during {op}: {source}")]
    Socket {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Selector registration beyond its fixed capacity.
    #[error("selector capacity exceeded ({capacity} descriptors)")]
    CapacityExceeded { capacity: usize },

    /// Short read or write not explained by close/reset.
    #[error("protocol violation: expected {expected} bytes, got {actual}")]
    ProtocolViolation { expected: usize, actual: usize },

    /// Malformed control request.
    #[error("parse error: {0}")]
    Parse(String),

    /// Control request does not fit the receive buffer.
    #[error("message too large (buffer holds {capacity} bytes)")]
    MessageTooLarge { capacity: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap an I/O error from a socket-level operation.
    pub fn socket(op: &'static str, source: std::io::Error) -> Self {
        Error::Socket { op, source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::CapacityExceeded { capacity: 4 };
        assert_eq!(err.to_string(), "selector capacity exceeded (4 descriptors)");

        let err = Error::ProtocolViolation {
            expected: 64,
            actual: 10,
        };
        assert_eq!(
            err.to_string(),
            "protocol violation: expected 64 bytes, got 10"
        );

        let err = Error::socket(
            "connect",
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        );
        assert!(err.to_string().starts_with("socket error during connect"));
    }
}
