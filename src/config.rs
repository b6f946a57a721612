//! Configuration module for echo-harness.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::loadgen::{LoadSettings, TestParameters};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "echo-harness")]
#[command(version = "0.1.0")]
#[command(about = "TCP echo load generator and latency harness", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve benchmark requests and report latency histograms
    Control {
        /// Address to bind to (e.g., 0.0.0.0:33331)
        #[arg(short = 'l', long)]
        listen: Option<String>,

        /// Load generator worker threads per request
        #[arg(short = 'w', long)]
        workers: Option<usize>,
    },

    /// Run the echo endpoint under test until all its connections close
    Echo {
        /// Connection multiplexing strategy
        #[arg(short, long, value_enum)]
        mode: Option<EchoMode>,

        /// Address to bind to (e.g., 0.0.0.0:9000)
        #[arg(short = 'l', long)]
        listen: Option<String>,

        /// Number of connections to accept
        #[arg(short = 'n', long)]
        connections: Option<usize>,

        /// Fixed message size in bytes
        #[arg(short = 's', long)]
        message_size: Option<usize>,

        /// Listen backlog
        #[arg(long)]
        backlog: Option<i32>,

        /// Run under SCHED_RR at maximum priority
        #[arg(long)]
        realtime: bool,
    },

    /// Send one benchmark request to a control endpoint and print the result
    Request {
        /// Control endpoint address
        #[arg(long, default_value = "127.0.0.1:33331")]
        control: String,

        target_ip: String,
        target_port: u16,
        connections: usize,
        duration_secs: u64,
        timeout_secs: u64,
        message_size: usize,
    },
}

/// How the endpoint under test multiplexes its connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EchoMode {
    /// One blocking thread per connection
    Thread,
    /// Single thread, level-triggered poll(2)
    Poll,
    /// Single thread, edge-triggered event notification
    Epoll,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub control: ControlSection,
    #[serde(default)]
    pub endpoint: EndpointSection,
    #[serde(default)]
    pub loadgen: LoadgenSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Control endpoint configuration
#[derive(Debug, Deserialize)]
pub struct ControlSection {
    #[serde(default = "default_control_listen")]
    pub listen: String,
    #[serde(default = "default_control_backlog")]
    pub backlog: i32,
    /// Load generator worker threads per request
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Largest accepted request in bytes
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
    /// Read timeout on control connections in milliseconds (0 = none)
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            listen: default_control_listen(),
            backlog: default_control_backlog(),
            workers: default_workers(),
            request_capacity: default_request_capacity(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

/// Endpoint-under-test configuration
#[derive(Debug, Deserialize)]
pub struct EndpointSection {
    #[serde(default = "default_endpoint_listen")]
    pub listen: String,
    #[serde(default = "default_mode")]
    pub mode: EchoMode,
    #[serde(default = "default_connections")]
    pub connections: usize,
    #[serde(default = "default_message_size")]
    pub message_size: usize,
    #[serde(default = "default_endpoint_backlog")]
    pub backlog: i32,
    #[serde(default)]
    pub realtime: bool,
}

impl Default for EndpointSection {
    fn default() -> Self {
        Self {
            listen: default_endpoint_listen(),
            mode: default_mode(),
            connections: default_connections(),
            message_size: default_message_size(),
            backlog: default_endpoint_backlog(),
            realtime: false,
        }
    }
}

/// Load generator timing
#[derive(Debug, Deserialize)]
pub struct LoadgenSection {
    #[serde(default = "default_interval_ms")]
    pub wait_interval_ms: u64,
    #[serde(default = "default_interval_ms")]
    pub sleep_step_ms: u64,
}

impl Default for LoadgenSection {
    fn default() -> Self {
        Self {
            wait_interval_ms: default_interval_ms(),
            sleep_step_ms: default_interval_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_control_listen() -> String {
    "0.0.0.0:33331".to_string()
}

fn default_control_backlog() -> i32 {
    3
}

fn default_workers() -> usize {
    1
}

fn default_request_capacity() -> usize {
    crate::control::REQUEST_CAPACITY
}

fn default_read_timeout_ms() -> u64 {
    5_000
}

fn default_endpoint_listen() -> String {
    "0.0.0.0:9000".to_string()
}

fn default_mode() -> EchoMode {
    EchoMode::Epoll
}

fn default_connections() -> usize {
    1
}

fn default_message_size() -> usize {
    64
}

fn default_endpoint_backlog() -> i32 {
    128
}

fn default_interval_ms() -> u64 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolved control endpoint settings
#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub listen: SocketAddr,
    pub backlog: i32,
    pub workers: usize,
    pub request_capacity: usize,
    pub read_timeout: Option<Duration>,
    pub load: LoadSettings,
}

/// Resolved endpoint-under-test settings
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub listen: SocketAddr,
    pub mode: EchoMode,
    pub connections: usize,
    pub message_size: usize,
    pub backlog: i32,
    pub realtime: bool,
}

#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub control: String,
    pub params: TestParameters,
}

/// What the binary was asked to do
#[derive(Debug, Clone)]
pub enum Action {
    Control(ControlConfig),
    Echo(EndpointConfig),
    Request(RequestConfig),
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub action: Action,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point at, if any.
    /// CLI arguments take precedence over TOML file values.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let log_level = if cli.log_level != "info" {
            cli.log_level
        } else {
            toml_config.logging.level
        };

        let action = match cli.command {
            Command::Control { listen, workers } => {
                let section = toml_config.control;
                let workers = workers.unwrap_or(section.workers);
                if workers == 0 {
                    return Err(ConfigError::Invalid("workers must be > 0".into()));
                }
                Action::Control(ControlConfig {
                    listen: parse_addr(listen.unwrap_or(section.listen))?,
                    backlog: section.backlog,
                    workers,
                    request_capacity: section.request_capacity,
                    read_timeout: match section.read_timeout_ms {
                        0 => None,
                        ms => Some(Duration::from_millis(ms)),
                    },
                    load: LoadSettings {
                        wait_interval: Duration::from_millis(toml_config.loadgen.wait_interval_ms),
                        sleep_step: Duration::from_millis(toml_config.loadgen.sleep_step_ms),
                    },
                })
            }
            Command::Echo {
                mode,
                listen,
                connections,
                message_size,
                backlog,
                realtime,
            } => {
                let section = toml_config.endpoint;
                let config = EndpointConfig {
                    listen: parse_addr(listen.unwrap_or(section.listen))?,
                    mode: mode.unwrap_or(section.mode),
                    connections: connections.unwrap_or(section.connections),
                    message_size: message_size.unwrap_or(section.message_size),
                    backlog: backlog.unwrap_or(section.backlog),
                    realtime: realtime || section.realtime,
                };
                if config.connections == 0 || config.message_size == 0 {
                    return Err(ConfigError::Invalid(
                        "connections and message size must be > 0".into(),
                    ));
                }
                Action::Echo(config)
            }
            Command::Request {
                control,
                target_ip,
                target_port,
                connections,
                duration_secs,
                timeout_secs,
                message_size,
            } => {
                let params = TestParameters {
                    target_ip,
                    target_port,
                    connections,
                    duration_secs,
                    timeout_secs,
                    message_size,
                };
                params
                    .validate()
                    .map_err(|e| ConfigError::Invalid(e.to_string()))?;
                Action::Request(RequestConfig { control, params })
            }
        };

        Ok(Config { log_level, action })
    }
}

fn parse_addr(addr: String) -> Result<SocketAddr, ConfigError> {
    addr.parse()
        .map_err(|e| ConfigError::InvalidAddress(addr, e))
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, toml::de::Error),
    #[error("Invalid address '{0}': {1}")]
    InvalidAddress(String, std::net::AddrParseError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, ConfigError> {
        Config::from_cli(CliArgs::try_parse_from(args).unwrap())
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.control.listen, "0.0.0.0:33331");
        assert_eq!(config.control.backlog, 3);
        assert_eq!(config.control.workers, 1);
        assert_eq!(config.control.request_capacity, 1024);
        assert_eq!(config.endpoint.mode, EchoMode::Epoll);
        assert_eq!(config.loadgen.wait_interval_ms, 100);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [control]
            listen = "127.0.0.1:4000"
            workers = 4

            [endpoint]
            mode = "poll"
            connections = 16
            message_size = 128

            [loadgen]
            wait_interval_ms = 50

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.control.listen, "127.0.0.1:4000");
        assert_eq!(config.control.workers, 4);
        assert_eq!(config.control.backlog, 3);
        assert_eq!(config.endpoint.mode, EchoMode::Poll);
        assert_eq!(config.endpoint.connections, 16);
        assert_eq!(config.endpoint.message_size, 128);
        assert_eq!(config.loadgen.wait_interval_ms, 50);
        assert_eq!(config.loadgen.sleep_step_ms, 100);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_echo() {
        let config = parse(&[
            "echo-harness",
            "echo",
            "--mode",
            "thread",
            "-l",
            "127.0.0.1:9100",
            "-n",
            "8",
            "--realtime",
        ])
        .unwrap();

        match config.action {
            Action::Echo(e) => {
                assert_eq!(e.mode, EchoMode::Thread);
                assert_eq!(e.listen, "127.0.0.1:9100".parse().unwrap());
                assert_eq!(e.connections, 8);
                assert_eq!(e.message_size, 64);
                assert!(e.realtime);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_cli_request() {
        let config = parse(&[
            "echo-harness",
            "--log-level",
            "debug",
            "request",
            "127.0.0.1",
            "9000",
            "4",
            "1",
            "5",
            "64",
        ])
        .unwrap();
        assert_eq!(config.log_level, "debug");

        match config.action {
            Action::Request(r) => {
                assert_eq!(r.control, "127.0.0.1:33331");
                assert_eq!(r.params.connections, 4);
                assert_eq!(r.params.message_size, 64);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            parse(&["echo-harness", "control", "--listen", "nowhere"]),
            Err(ConfigError::InvalidAddress(..))
        ));
        assert!(matches!(
            parse(&["echo-harness", "control", "--workers", "0"]),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            parse(&["echo-harness", "request", "127.0.0.1", "9000", "0", "1", "5", "64"]),
            Err(ConfigError::Invalid(_))
        ));
    }
}
