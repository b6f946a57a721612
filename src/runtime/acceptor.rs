//! Accept a fixed number of inbound connections.

use crate::error::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener, TcpStream};
use tracing::{debug, error, info};

/// Create a listening socket with `SO_REUSEADDR` set.
pub fn listen(addr: SocketAddr, backlog: i32) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| Error::socket("socket", e))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| Error::socket("setsockopt(SO_REUSEADDR)", e))?;
    socket
        .bind(&addr.into())
        .map_err(|e| Error::socket("bind", e))?;
    socket
        .listen(backlog)
        .map_err(|e| Error::socket("listen", e))?;

    Ok(socket.into())
}

/// Bind and listen on `addr`, then accept exactly `count` connections.
///
/// `on_ready` runs once the socket is listening and receives the bound
/// address (useful when `addr` has port 0). `on_each` runs for every
/// accepted connection after the optional switch to non-blocking mode.
///
/// Any accept failure aborts the whole call; connections accepted so far
/// are closed on return.
pub fn accept_n<R, C>(
    addr: SocketAddr,
    count: usize,
    backlog: i32,
    on_ready: R,
    mut on_each: C,
    nonblocking: bool,
) -> Result<Vec<TcpStream>>
where
    R: FnOnce(SocketAddr),
    C: FnMut(&TcpStream) -> Result<()>,
{
    let listener = listen(addr, backlog)?;
    let local = listener
        .local_addr()
        .map_err(|e| Error::socket("getsockname", e))?;

    info!(addr = %local, count, "Waiting for connections");
    on_ready(local);

    let mut accepted = Vec::with_capacity(count);
    for _ in 0..count {
        let (stream, peer) = listener.accept().map_err(|e| {
            error!(error = %e, accepted = accepted.len(), "Accept failed");
            Error::socket("accept", e)
        })?;

        if nonblocking {
            stream
                .set_nonblocking(true)
                .map_err(|e| Error::socket("set_nonblocking", e))?;
        }
        debug!(peer = %peer, "Accepted connection");

        on_each(&stream)?;
        accepted.push(stream);
    }

    Ok(accepted)
}
