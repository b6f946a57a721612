//! Connection plumbing shared by the endpoint under test and the load
//! generator.
//!
//! - `Selector`: readiness selection with two backends
//!   (`PollSelector` over `poll(2)`, `EventSelector` over mio)
//! - `accept_n`: accept a fixed number of inbound connections
//! - `serve_once`: one fixed-size echo round trip

mod acceptor;
mod event;
mod poll;
mod sched;
mod selector;
mod session;

pub use acceptor::{accept_n, listen};
pub use event::EventSelector;
pub use poll::PollSelector;
pub use sched::set_realtime_priority;
pub use selector::{build, Backend, Readiness, Ready, Selector};
pub use session::{serve_once, Outcome};
