//! Multi-worker load generator.
//!
//! The orchestrator connects every socket up front, splits them into
//! contiguous shares, one per worker, and primes each connection with a
//! first message. Workers then ping-pong independently on their own
//! edge-triggered selector, timing every round trip. When the run
//! duration elapses (or every worker has run out of connections) the
//! orchestrator raises the stop flag, joins all workers and sums their
//! results.

mod connection;
mod histogram;
mod params;
mod worker;

pub use connection::{Connection, Progress, Transport, FILL_BYTE};
pub use histogram::{bucket_index, LatencyHistogram, RunResult, BUCKETS};
pub use params::{TestParameters, MAX_MESSAGE_SIZE};
pub use worker::{RunState, Worker};

use crate::error::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Timing knobs for a run.
#[derive(Debug, Clone, Copy)]
pub struct LoadSettings {
    /// Upper bound on how long a worker blocks before rechecking the stop flag.
    pub wait_interval: Duration,
    /// Orchestrator sleep granularity while the run is in progress.
    pub sleep_step: Duration,
}

impl Default for LoadSettings {
    fn default() -> Self {
        Self {
            wait_interval: Duration::from_millis(100),
            sleep_step: Duration::from_millis(100),
        }
    }
}

/// Run one benchmark with default timing.
pub fn run(params: &TestParameters, workers: usize) -> Result<RunResult> {
    run_with(params, workers, &LoadSettings::default())
}

pub fn run_with(
    params: &TestParameters,
    workers: usize,
    settings: &LoadSettings,
) -> Result<RunResult> {
    params.validate()?;
    if workers == 0 {
        return Err(Error::Config("worker count must be > 0".into()));
    }

    let streams = connect_all(params)?;
    run_on(streams, params, workers, settings)
}

/// Drive already-connected `streams`: partition them across `workers`,
/// prime, run for the requested duration, stop, join and merge.
///
/// A worker that ends early on an I/O error still contributes what it
/// measured before the failure.
pub fn run_on<S: Transport>(
    streams: Vec<S>,
    params: &TestParameters,
    workers: usize,
    settings: &LoadSettings,
) -> Result<RunResult> {
    if workers == 0 || streams.is_empty() {
        return Err(Error::Config(
            "need at least one worker and one connection".into(),
        ));
    }
    let workers = workers.min(streams.len());

    let mut pool = Vec::with_capacity(workers);
    for (id, share) in partition(streams, workers).into_iter().enumerate() {
        if share.is_empty() {
            return Err(Error::Config(format!("worker {id} has no connections")));
        }
        pool.push(Worker::new(
            id,
            share,
            params.message_size,
            settings.wait_interval,
        )?);
    }

    for worker in pool.iter_mut() {
        worker.prime()?;
    }

    info!(
        target_ip = %params.target_ip,
        target_port = params.target_port,
        connections = params.connections,
        workers,
        duration_secs = params.duration_secs,
        message_size = params.message_size,
        "Load generation started"
    );

    let state = Arc::new(RunState::new(pool.len()));
    let mut handles: Vec<JoinHandle<RunResult>> = Vec::with_capacity(pool.len());
    let mut spawn_error = None;

    for (id, worker) in pool.into_iter().enumerate() {
        let worker_state = Arc::clone(&state);
        match thread::Builder::new()
            .name(format!("loadgen-{id}"))
            .spawn(move || worker.run(&worker_state))
        {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                error!(worker = id, error = %e, "Failed to spawn worker");
                spawn_error = Some(e);
                break;
            }
        }
    }

    if spawn_error.is_none() {
        wait_for_run(&state, params.duration(), settings.sleep_step);
    }
    state.request_stop();

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.join() {
            Ok(result) => results.push(result),
            Err(_) => error!("Worker panicked; its measurements are lost"),
        }
    }

    if let Some(e) = spawn_error {
        return Err(e.into());
    }

    let merged = RunResult::merge(&results);
    info!(
        round_trips = merged.round_trips,
        measured = merged.histogram.samples(),
        "Load generation finished"
    );
    Ok(merged)
}

/// Sleep in `step` increments until `duration` elapses or no worker is left.
fn wait_for_run(state: &RunState, duration: Duration, step: Duration) {
    let deadline = Instant::now() + duration;
    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(step.min(deadline - now));

        if state.active() == 0 {
            info!("All workers finished before the deadline");
            break;
        }
    }
}

/// Resolve the target and open `params.connections` connected, non-blocking sockets.
pub fn connect_all(params: &TestParameters) -> Result<Vec<TcpStream>> {
    let addr = resolve(&params.target_ip, params.target_port)?;

    let mut streams = Vec::with_capacity(params.connections);
    for i in 0..params.connections {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| Error::socket("socket", e))?;
        socket.connect(&addr.into()).map_err(|e| {
            error!(addr = %addr, connected = i, error = %e, "Connect failed");
            Error::socket("connect", e)
        })?;
        socket
            .set_nonblocking(true)
            .map_err(|e| Error::socket("set_nonblocking", e))?;
        streams.push(socket.into());
    }

    debug!(addr = %addr, count = streams.len(), "Connected");
    Ok(streams)
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::socket("resolve", e))?;
    addrs.next().ok_or_else(|| {
        Error::socket(
            "resolve",
            io::Error::new(io::ErrorKind::NotFound, format!("no address for {host}")),
        )
    })
}

/// Split `items` into `parts` contiguous shares of `len / parts` items;
/// the last share takes the remainder.
fn partition<T>(mut items: Vec<T>, parts: usize) -> Vec<Vec<T>> {
    let step = items.len() / parts;
    let mut shares = Vec::with_capacity(parts);
    for _ in 1..parts {
        let rest = items.split_off(step);
        shares.push(std::mem::replace(&mut items, rest));
    }
    shares.push(items);
    shares
}
