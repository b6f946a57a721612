//! Load generator worker: one edge-triggered event loop per thread.

use super::connection::{Connection, Progress, Transport};
use super::histogram::RunResult;
use crate::error::{Error, Result};
use crate::runtime::{EventSelector, Selector};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// State shared between the orchestrator and all workers.
#[derive(Debug)]
pub struct RunState {
    stop: AtomicBool,
    active: AtomicUsize,
}

impl RunState {
    pub fn new(workers: usize) -> Self {
        Self {
            stop: AtomicBool::new(false),
            active: AtomicUsize::new(workers),
        }
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Workers that have not yet returned.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

/// Decrements the active-worker count however the worker exits.
struct ActiveGuard<'a>(&'a RunState);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct Worker<S = TcpStream> {
    id: usize,
    selector: EventSelector,
    /// Indexed by selector token; `None` once closed.
    connections: Vec<Option<Connection<S>>>,
    live: usize,
    wait_interval: Duration,
}

impl<S: Transport> Worker<S> {
    /// Register `streams` with a fresh event selector.
    pub fn new(
        id: usize,
        streams: Vec<S>,
        message_size: usize,
        wait_interval: Duration,
    ) -> Result<Self> {
        let mut selector = EventSelector::new(streams.len())?;
        let mut connections = Vec::with_capacity(streams.len());

        for stream in streams {
            let conn = Connection::new(stream, message_size);
            let token = selector.add(conn.fd())?;
            debug_assert_eq!(token, connections.len());
            connections.push(Some(conn));
        }

        let live = connections.len();
        Ok(Self {
            id,
            selector,
            connections,
            live,
            wait_interval,
        })
    }

    /// Write the first message on every connection.
    pub fn prime(&mut self) -> Result<()> {
        for conn in self.connections.iter_mut().flatten() {
            conn.prime()?;
        }
        Ok(())
    }

    /// Run until stopped, until every connection has closed, or until a
    /// fatal I/O error. Whatever was measured is returned in all cases.
    pub fn run(mut self, state: &RunState) -> RunResult {
        let _guard = ActiveGuard(state);
        let mut result = RunResult::new();

        match self.event_loop(state, &mut result) {
            Ok(()) => debug!(
                worker = self.id,
                round_trips = result.round_trips,
                "Worker finished"
            ),
            Err(e) => error!(
                worker = self.id,
                error = %e,
                round_trips = result.round_trips,
                "Worker terminated early"
            ),
        }
        result
    }

    fn event_loop(&mut self, state: &RunState, result: &mut RunResult) -> Result<()> {
        while self.live > 0 {
            if state.stop_requested() {
                return Ok(());
            }
            if !self.selector.wait(Some(self.wait_interval))? {
                continue;
            }

            while let Some(ready) = self.selector.next_ready() {
                if state.stop_requested() {
                    return Ok(());
                }

                let conn = match self.connections.get_mut(ready.token).and_then(Option::as_mut) {
                    Some(conn) => conn,
                    None => continue,
                };

                match conn.drain(result) {
                    Ok(Progress::Open) => {}
                    Ok(Progress::Closed) => {
                        debug!(worker = self.id, fd = ready.fd, "Peer closed connection");
                        self.close_current(ready.token)?;
                    }
                    Err(Error::ProtocolViolation { expected, actual }) => {
                        warn!(
                            worker = self.id,
                            fd = ready.fd,
                            expected,
                            actual,
                            "Dropping connection after short transfer"
                        );
                        self.close_current(ready.token)?;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        info!(worker = self.id, "All connections closed");
        Ok(())
    }

    fn close_current(&mut self, token: usize) -> Result<()> {
        self.selector.remove_current()?;
        if let Some(conn) = self.connections[token].take() {
            debug!(
                worker = self.id,
                round_trips = conn.round_trips(),
                "Connection closed"
            );
        }
        self.live -= 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_run_state_counts_down() {
        let state = RunState::new(2);
        {
            let _a = ActiveGuard(&state);
            assert_eq!(state.active(), 2);
        }
        assert_eq!(state.active(), 1);
        assert!(!state.stop_requested());
        state.request_stop();
        assert!(state.stop_requested());
    }

    /// `n` non-blocking client sockets and their accepted peers.
    fn connected(n: usize) -> (Vec<TcpStream>, Vec<TcpStream>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let clients: Vec<_> = (0..n)
            .map(|_| {
                let s = TcpStream::connect(addr).unwrap();
                s.set_nonblocking(true).unwrap();
                s
            })
            .collect();
        let peers = (0..n).map(|_| listener.accept().unwrap().0).collect();
        (clients, peers)
    }

    fn start(mut worker: Worker) -> (Arc<RunState>, thread::JoinHandle<RunResult>) {
        worker.prime().unwrap();
        let state = Arc::new(RunState::new(1));
        let handle = {
            let state = Arc::clone(&state);
            thread::spawn(move || worker.run(&state))
        };
        (state, handle)
    }

    /// Echo `rounds` messages back, then read the final echo.
    fn echo_rounds(peer: &mut TcpStream, message_size: usize, rounds: usize) {
        let mut buf = vec![0u8; message_size];
        for _ in 0..rounds {
            peer.read_exact(&mut buf).unwrap();
            peer.write_all(&buf).unwrap();
        }
        peer.read_exact(&mut buf).unwrap();
    }

    #[test]
    fn test_worker_exits_when_peers_close() {
        let (clients, peers) = connected(2);
        let worker = Worker::new(0, clients, 16, Duration::from_millis(20)).unwrap();
        let (state, handle) = start(worker);

        // Echo a few rounds from each peer, then hang up.
        for mut peer in peers {
            echo_rounds(&mut peer, 16, 3);
        }

        let result = handle.join().unwrap();
        assert_eq!(state.active(), 0);
        assert_eq!(result.round_trips, 6);
        // One unmeasured round trip per connection.
        assert_eq!(result.histogram.samples(), 4);
    }

    #[test]
    fn test_reset_drops_only_that_connection() {
        let (clients, mut peers) = connected(2);
        let worker = Worker::new(0, clients, 16, Duration::from_millis(20)).unwrap();
        let (state, handle) = start(worker);

        // Abortive close: the worker sees ECONNRESET on the first connection.
        let reset = peers.remove(0);
        socket2::SockRef::from(&reset)
            .set_linger(Some(Duration::ZERO))
            .unwrap();
        drop(reset);

        let mut survivor = peers.remove(0);
        echo_rounds(&mut survivor, 16, 5);

        state.request_stop();
        let result = handle.join().unwrap();
        assert_eq!(state.active(), 0);
        assert_eq!(result.round_trips, 5);
        assert_eq!(result.histogram.samples(), 4);
    }

    #[test]
    fn test_short_write_drops_only_that_connection() {
        const SIZE: usize = 1024;
        let (clients, mut peers) = connected(2);

        // Tiny buffers on the first connection so echoes soon stop fitting.
        socket2::SockRef::from(&clients[0])
            .set_send_buffer_size(4096)
            .unwrap();
        socket2::SockRef::from(&peers[0])
            .set_recv_buffer_size(4096)
            .unwrap();

        let worker = Worker::new(0, clients, SIZE, Duration::from_millis(20)).unwrap();
        let (state, handle) = start(worker);

        // Send without ever reading echoes back. The loop only ends once the
        // worker has given up on this connection and closed it.
        let mut flooder = peers.remove(0);
        let flood = thread::spawn(move || {
            let msg = [b'F'; SIZE];
            let mut sent = 0u64;
            while flooder.write_all(&msg).is_ok() {
                sent += 1;
            }
            sent
        });
        assert!(flood.join().unwrap() > 0);

        let mut survivor = peers.remove(0);
        echo_rounds(&mut survivor, SIZE, 3);

        state.request_stop();
        let result = handle.join().unwrap();
        assert_eq!(state.active(), 0);
        assert!(result.round_trips >= 3);
    }
}
