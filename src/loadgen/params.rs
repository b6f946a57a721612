//! Benchmark request parameters.

use crate::error::{Error, Result};
use std::time::Duration;

/// Largest message size a request may ask for.
///
/// This only bounds allocation. Echo endpoints serve each message with a
/// single `read` and `write`, so a message that does not fit one socket
/// buffer arrives split and the endpoint drops the connection. In
/// practice keep messages well under the socket buffer size.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestParameters {
    /// Host name or IP address of the endpoint under test.
    pub target_ip: String,
    pub target_port: u16,
    pub connections: usize,
    pub duration_secs: u64,
    /// Liveness-check interval. Carried on the wire and validated, not
    /// otherwise acted on.
    pub timeout_secs: u64,
    pub message_size: usize,
}

impl TestParameters {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_ip.is_empty() {
            return Err(Error::Parse("target address is empty".into()));
        }
        if self.target_port == 0 {
            return Err(Error::Parse("target port must be > 0".into()));
        }
        if self.connections == 0 {
            return Err(Error::Parse("connection count must be > 0".into()));
        }
        if self.duration_secs == 0 {
            return Err(Error::Parse("run duration must be > 0".into()));
        }
        if self.message_size == 0 || self.message_size > MAX_MESSAGE_SIZE {
            return Err(Error::Parse(format!(
                "message size must be in 1..={MAX_MESSAGE_SIZE}"
            )));
        }
        Ok(())
    }
}
