//! echo-harness binary.
//!
//! Subcommands:
//! - `control`: serve benchmark requests
//! - `echo`: run the endpoint under test once
//! - `request`: submit a benchmark request and print the histogram

use echo_harness::config::{Action, Config, ControlConfig, EndpointConfig, RequestConfig};
use echo_harness::control::{self, ControlServer};
use echo_harness::endpoint::{self, Announce};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging; stdout is reserved for results and announcements
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match config.action {
        Action::Control(config) => run_control(config),
        Action::Echo(config) => run_echo(config),
        Action::Request(config) => run_request(config),
    }
}

fn run_control(config: ControlConfig) -> Result<(), Box<dyn std::error::Error>> {
    let server = ControlServer::bind(config)?;
    server.run()?;
    Ok(())
}

fn run_echo(config: EndpointConfig) -> Result<(), Box<dyn std::error::Error>> {
    endpoint::run(&config, &mut Announce::new(std::io::stdout()))?;
    Ok(())
}

fn run_request(config: RequestConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(control = %config.control, "Submitting benchmark request");
    let result = control::request(&config.control, &config.params)?;
    println!("{result}");
    print!("{}", control::summary(&result, &config.params));
    Ok(())
}
