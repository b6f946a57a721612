//! Control endpoint and its text protocol.
//!
//! A requester connects, sends one line of test parameters and receives
//! the merged latency histogram once the run completes.

mod client;
mod protocol;
mod server;

pub use client::{request, summary};
pub use protocol::{format_request, parse_request, read_request, REQUEST_CAPACITY};
pub use server::ControlServer;
