//! Control endpoint: one benchmark request per connection, served
//! sequentially.

use super::protocol::{parse_request, read_request};
use crate::config::ControlConfig;
use crate::error::{Error, Result};
use crate::loadgen::{self, RunResult};
use crate::runtime;
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

pub struct ControlServer {
    listener: TcpListener,
    config: ControlConfig,
}

impl ControlServer {
    pub fn bind(config: ControlConfig) -> Result<Self> {
        let listener = runtime::listen(config.listen, config.backlog)?;
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| Error::socket("getsockname", e))
    }

    /// Serve requests forever. Per-request failures are logged and the
    /// loop moves on to the next connection.
    pub fn run(&self) -> Result<()> {
        info!(addr = %self.local_addr()?, workers = self.config.workers, "Control endpoint listening");
        loop {
            if let Err(e) = self.handle_next() {
                warn!(error = %e, "Request failed");
            }
        }
    }

    /// Accept one control connection and serve it to completion.
    pub fn handle_next(&self) -> Result<RunResult> {
        let (stream, peer) = self
            .listener
            .accept()
            .map_err(|e| Error::socket("accept", e))?;
        info!(peer = %peer, "Client connected");
        self.serve(stream)
    }

    fn serve(&self, mut stream: TcpStream) -> Result<RunResult> {
        stream.set_read_timeout(self.config.read_timeout)?;

        let request = read_request(&mut stream, self.config.request_capacity)?;
        info!(request = %request, "Received test request");
        let params = parse_request(&request)?;

        let result = loadgen::run_with(&params, self.config.workers, &self.config.load)
            .map_err(|e| {
                error!(error = %e, "Benchmark run failed");
                e
            })?;

        let response = result.to_string();
        info!(result = %response, "Test finished");
        stream.write_all(response.as_bytes())?;
        debug!("Response written, closing control connection");
        Ok(result)
    }
}
