//! The echo endpoint under test.
//!
//! Three ways to serve the same fixed-size echo protocol:
//! - `Thread`: one blocking thread per accepted connection
//! - `Poll`: a single thread over a level-triggered `PollSelector`
//! - `Epoll`: a single thread over an edge-triggered `EventSelector`
//!
//! Each run accepts a fixed number of connections, serves them until every
//! one has closed, and returns the number of messages echoed.

use crate::config::{EchoMode, EndpointConfig};
use crate::error::Result;
use crate::runtime::{self, accept_n, serve_once, Backend, Outcome, Selector};
use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::unix::io::AsRawFd;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Progress notifications for whoever started the endpoint, e.g. a
/// harness that must not connect before the socket is listening.
pub trait Lifecycle {
    /// The listening socket is bound; connections may now be made.
    fn listening(&mut self, _addr: SocketAddr) {}
    /// All connections are accepted and being served.
    fn prepared(&mut self) {}
    /// Every connection has closed.
    fn finished(&mut self) {}
}

/// Writes one line per milestone (`listening ADDR`, `prepared`,
/// `finished`) for a wrapping harness to synchronise on.
pub struct Announce<W> {
    out: W,
}

impl<W: Write> Announce<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    fn say(&mut self, line: &str) {
        if let Err(e) = writeln!(self.out, "{line}").and_then(|()| self.out.flush()) {
            warn!(error = %e, line, "Failed to announce lifecycle event");
        }
    }
}

impl<W: Write> Lifecycle for Announce<W> {
    fn listening(&mut self, addr: SocketAddr) {
        self.say(&format!("listening {addr}"));
    }

    fn prepared(&mut self) {
        self.say("prepared");
    }

    fn finished(&mut self) {
        self.say("finished");
    }
}

/// Run the endpoint in the configured mode.
pub fn run(config: &EndpointConfig, hooks: &mut dyn Lifecycle) -> Result<u64> {
    if config.realtime {
        match runtime::set_realtime_priority() {
            Ok(()) => info!("Running with SCHED_RR priority"),
            Err(e) => warn!(error = %e, "Could not switch to realtime scheduling"),
        }
    }

    info!(
        mode = ?config.mode,
        addr = %config.listen,
        connections = config.connections,
        message_size = config.message_size,
        "Starting echo endpoint"
    );

    let echoed = match config.mode {
        EchoMode::Thread => run_threaded(config, hooks)?,
        EchoMode::Poll => {
            let mut selector = runtime::build(Backend::Poll, config.connections)?;
            run_selector(selector.as_mut(), config, hooks)?
        }
        EchoMode::Epoll => {
            let mut selector = runtime::build(Backend::Event, config.connections)?;
            run_selector(selector.as_mut(), config, hooks)?
        }
    };

    info!(echoed, "Echo endpoint finished");
    Ok(echoed)
}

/// Thread-per-connection: each accepted socket gets a blocking echo loop.
///
/// If accepting fails part way, the threads already running are shut
/// down before the error is returned.
pub fn run_threaded(config: &EndpointConfig, hooks: &mut dyn Lifecycle) -> Result<u64> {
    let message_size = config.message_size;
    let mut threads = EchoThreads::with_capacity(config.connections);

    let accepted = accept_n(
        config.listen,
        config.connections,
        config.backlog,
        |addr| hooks.listening(addr),
        |stream| threads.spawn(stream, message_size),
        false,
    )
    // Only the clones held by `threads` keep the sockets open.
    .map(drop);

    if let Err(e) = accepted {
        warn!(error = %e, running = threads.len(), "Accept failed; stopping echo threads");
        threads.abort();
        threads.join();
        return Err(e);
    }

    hooks.prepared();
    let echoed = threads.join();
    hooks.finished();
    Ok(echoed)
}

/// Echo threads spawned so far, plus a handle on each socket so they can
/// be unblocked when the endpoint bails out.
struct EchoThreads {
    handles: Vec<JoinHandle<u64>>,
    sockets: Vec<TcpStream>,
}

impl EchoThreads {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            handles: Vec::with_capacity(capacity),
            sockets: Vec::with_capacity(capacity),
        }
    }

    fn len(&self) -> usize {
        self.handles.len()
    }

    fn spawn(&mut self, stream: &TcpStream, message_size: usize) -> Result<()> {
        let conn = stream.try_clone()?;
        let socket = stream.try_clone()?;
        let handle = thread::Builder::new()
            .name(format!("echo-{}", self.handles.len()))
            .spawn(move || echo_until_closed(conn, message_size))?;
        self.handles.push(handle);
        self.sockets.push(socket);
        Ok(())
    }

    /// Shut down every socket so threads blocked in `read` see end of stream.
    fn abort(&self) {
        for socket in &self.sockets {
            if let Err(e) = socket.shutdown(Shutdown::Both) {
                debug!(error = %e, "Shutdown of echo socket failed");
            }
        }
    }

    /// Wait for every thread. Returns the total number of messages echoed.
    fn join(self) -> u64 {
        let EchoThreads { handles, sockets } = self;
        drop(sockets);

        let mut echoed = 0;
        for handle in handles {
            match handle.join() {
                Ok(n) => echoed += n,
                Err(_) => warn!("Echo thread panicked"),
            }
        }
        echoed
    }
}

fn echo_until_closed(mut stream: TcpStream, message_size: usize) -> u64 {
    let mut buf = vec![0u8; message_size];
    let mut echoed = 0;
    loop {
        match serve_once(&mut stream, &mut buf) {
            Ok(Outcome::Echoed) => echoed += 1,
            Ok(Outcome::Idle) => continue,
            Ok(Outcome::Closed) => break,
            Err(e) => {
                warn!(error = %e, "Ending echo session");
                break;
            }
        }
    }
    debug!(echoed, "Connection closed");
    echoed
}

/// Single-threaded multiplexing over `selector`.
pub fn run_selector(
    selector: &mut dyn Selector,
    config: &EndpointConfig,
    hooks: &mut dyn Lifecycle,
) -> Result<u64> {
    let streams = accept_n(
        config.listen,
        config.connections,
        config.backlog,
        |addr| hooks.listening(addr),
        |_| Ok(()),
        true,
    )?;

    // Indexed by selector token.
    let mut connections: Vec<Option<TcpStream>> = Vec::with_capacity(streams.len());
    for stream in streams {
        let token = selector.add(stream.as_raw_fd())?;
        debug_assert_eq!(token, connections.len());
        connections.push(Some(stream));
    }
    hooks.prepared();

    let mut buf = vec![0u8; config.message_size];
    let mut left = connections.len();
    let mut echoed = 0;

    while left > 0 {
        if !selector.wait(None)? {
            continue;
        }

        while let Some(ready) = selector.next_ready() {
            let stream = match connections.get_mut(ready.token).and_then(Option::as_mut) {
                Some(stream) => stream,
                None => continue,
            };

            let r = ready.readiness;
            let close = if r.is_hangup() || r.is_error() {
                true
            } else if r.is_invalid() {
                warn!(fd = ready.fd, readiness = ?r, "Descriptor not open");
                true
            } else if r.is_readable() {
                match serve_once(stream, &mut buf) {
                    Ok(Outcome::Echoed) => {
                        echoed += 1;
                        false
                    }
                    Ok(Outcome::Idle) => false,
                    Ok(Outcome::Closed) => true,
                    Err(e) => {
                        debug!(fd = ready.fd, error = %e, "Ending echo session");
                        true
                    }
                }
            } else {
                warn!(fd = ready.fd, readiness = ?r, "Unexpected readiness");
                true
            };

            if close {
                selector.remove_current()?;
                connections[ready.token] = None;
                left -= 1;
            }
        }
    }

    hooks.finished();
    Ok(echoed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::sync::mpsc;

    struct Notify(mpsc::Sender<SocketAddr>, Vec<&'static str>);

    impl Lifecycle for Notify {
        fn listening(&mut self, addr: SocketAddr) {
            self.1.push("listening");
            self.0.send(addr).unwrap();
        }
        fn prepared(&mut self) {
            self.1.push("prepared");
        }
        fn finished(&mut self) {
            self.1.push("finished");
        }
    }

    fn config(mode: EchoMode, connections: usize) -> EndpointConfig {
        EndpointConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            mode,
            connections,
            message_size: 32,
            backlog: 16,
            realtime: false,
        }
    }

    fn exercise(mode: EchoMode) {
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let mut hooks = Notify(tx, Vec::new());
            let echoed = run(&config(mode, 3), &mut hooks).unwrap();
            (echoed, hooks.1)
        });

        let addr = rx.recv().unwrap();
        let mut clients: Vec<_> = (0..3).map(|_| TcpStream::connect(addr).unwrap()).collect();
        for round in 0..5u8 {
            for client in clients.iter_mut() {
                let msg = [round; 32];
                client.write_all(&msg).unwrap();
                let mut back = [0u8; 32];
                client.read_exact(&mut back).unwrap();
                assert_eq!(back, msg);
            }
        }
        drop(clients);

        let (echoed, events) = handle.join().unwrap();
        assert_eq!(echoed, 15);
        assert_eq!(events, vec!["listening", "prepared", "finished"]);
    }

    #[test]
    fn test_abort_unblocks_echo_threads() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut clients: Vec<_> = (0..2).map(|_| TcpStream::connect(addr).unwrap()).collect();

        let mut threads = EchoThreads::with_capacity(2);
        for _ in 0..2 {
            let (server, _) = listener.accept().unwrap();
            threads.spawn(&server, 32).unwrap();
        }
        assert_eq!(threads.len(), 2);

        let msg = [7u8; 32];
        let mut back = [0u8; 32];
        clients[0].write_all(&msg).unwrap();
        clients[0].read_exact(&mut back).unwrap();
        assert_eq!(back, msg);

        // Clients stay connected; only the shutdown can end the threads.
        threads.abort();
        assert_eq!(threads.join(), 1);

        for client in clients.iter_mut() {
            assert_eq!(client.read(&mut back).unwrap(), 0);
        }
    }

    #[test]
    fn test_announce_lines() {
        let mut hooks = Announce::new(Vec::new());
        hooks.listening("127.0.0.1:9000".parse().unwrap());
        hooks.prepared();
        hooks.finished();
        assert_eq!(
            String::from_utf8(hooks.out).unwrap(),
            "listening 127.0.0.1:9000\nprepared\nfinished\n"
        );
    }

    struct Closed;

    impl Write for Closed {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_announce_survives_closed_output() {
        let mut hooks = Announce::new(Closed);
        hooks.listening("127.0.0.1:9000".parse().unwrap());
        hooks.finished();
    }

    #[test]
    fn test_threaded_mode() {
        exercise(EchoMode::Thread);
    }

    #[test]
    fn test_poll_mode() {
        exercise(EchoMode::Poll);
    }

    #[test]
    fn test_epoll_mode() {
        exercise(EchoMode::Epoll);
    }
}
