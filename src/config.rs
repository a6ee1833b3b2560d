//! Configuration for the demo server binary.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tcp_daemon::{splitter, ConnectionSettings, Splitter};
use thiserror::Error;

/// How the byte stream is cut into messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Fixed-size frames of `frame_length` bytes
    Fixed,
    /// Newline-terminated lines
    Line,
    /// Whatever one read returns
    Whole,
}

/// Command-line arguments for the demo server
#[derive(Parser, Debug)]
#[command(name = "tcp-daemon")]
#[command(version)]
#[command(about = "Word-transforming demo server built on tcp-daemon", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:11223)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Message framing
    #[arg(short = 'f', long, value_enum)]
    pub framing: Option<Framing>,

    /// Frame size in bytes for fixed framing
    #[arg(long)]
    pub frame_length: Option<usize>,

    /// Deadline for writing one message, in milliseconds
    #[arg(long)]
    pub write_timeout_ms: Option<u64>,

    /// Close idle connections after this many milliseconds (0 = never)
    #[arg(long)]
    pub read_timeout_ms: Option<u64>,

    /// Maximum number of simultaneous connections
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Push a timestamp to every connection at this interval in seconds (0 = off)
    #[arg(short = 't', long)]
    pub tick_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_framing")]
    pub framing: Framing,
    #[serde(default = "default_frame_length")]
    pub frame_length: usize,
    /// Timestamp push interval in seconds
    #[serde(default)]
    pub tick_interval: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            framing: default_framing(),
            frame_length: default_frame_length(),
            tick_interval: 0,
        }
    }
}

/// Per-connection configuration
#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// 0 disables the idle timeout
    #[serde(default)]
    pub read_timeout_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: default_write_timeout_ms(),
            read_timeout_ms: 0,
            max_connections: default_max_connections(),
            read_chunk_size: default_read_chunk_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
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

fn default_listen() -> String {
    "0.0.0.0:11223".to_string()
}

fn default_framing() -> Framing {
    Framing::Fixed
}

fn default_frame_length() -> usize {
    5
}

fn default_write_timeout_ms() -> u64 {
    1000
}

fn default_max_connections() -> usize {
    10_000
}

fn default_read_chunk_size() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub framing: Framing,
    pub frame_length: usize,
    pub write_timeout: Duration,
    pub read_timeout: Option<Duration>,
    pub max_connections: usize,
    pub read_chunk_size: usize,
    pub tick_interval: Option<Duration>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Merge CLI args over the TOML file they name, if any.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents)
                .map_err(|source| ConfigError::TomlParse {
                    path: config_path.clone(),
                    source,
                })?
        } else {
            TomlConfig::default()
        };

        let framing = cli.framing.unwrap_or(toml_config.server.framing);
        let frame_length = cli.frame_length.unwrap_or(toml_config.server.frame_length);
        if framing == Framing::Fixed && frame_length == 0 {
            return Err(ConfigError::InvalidFraming(
                "frame_length must be at least 1 for fixed framing".to_string(),
            ));
        }

        let read_timeout_ms = cli
            .read_timeout_ms
            .unwrap_or(toml_config.connection.read_timeout_ms);
        let tick_interval = cli.tick_interval.unwrap_or(toml_config.server.tick_interval);

        Ok(Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            framing,
            frame_length,
            write_timeout: Duration::from_millis(
                cli.write_timeout_ms
                    .unwrap_or(toml_config.connection.write_timeout_ms),
            ),
            read_timeout: (read_timeout_ms > 0).then(|| Duration::from_millis(read_timeout_ms)),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.connection.max_connections),
            read_chunk_size: toml_config.connection.read_chunk_size.max(1),
            tick_interval: (tick_interval > 0).then(|| Duration::from_secs(tick_interval)),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }

    pub fn splitter(&self) -> Splitter {
        match self.framing {
            Framing::Fixed => splitter::fixed_length(self.frame_length),
            Framing::Line => splitter::delimited(b'\n'),
            Framing::Whole => splitter::whole_buffer(),
        }
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            read_chunk_size: self.read_chunk_size,
            write_timeout: self.write_timeout,
            read_timeout: self.read_timeout,
            max_connections: self.max_connections,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path:?}: {source}")]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid framing: {0}")]
    InvalidFraming(String),
}
