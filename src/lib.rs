//! echo-harness: concurrent TCP echo benchmarking.
//!
//! Two halves that talk over plain TCP:
//! - the endpoint under test (`endpoint`), an echo server that can run
//!   thread-per-connection or multiplex connections over `poll(2)` or
//!   edge-triggered event notification
//! - the control endpoint (`control`), which accepts a benchmark request,
//!   drives the multi-worker load generator (`loadgen`) against an echo
//!   endpoint and answers with a log2 latency histogram

pub mod config;
pub mod control;
pub mod endpoint;
pub mod error;
pub mod loadgen;
pub mod runtime;

pub use error::{Error, Result};
