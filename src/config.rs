//! Configuration for the echo server.
//!
//! The protocol and port come from two positional arguments. Everything
//! else has a default and can be set on the command line or in an optional
//! TOML file. CLI arguments take precedence over config file values.

use crate::protocols::{Protocol, UnknownProtocol};
use clap::Parser;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::PathBuf;

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "enum-echo")]
#[command(version)]
#[command(about = "Thrift echo server for cross-language interoperability tests", long_about = None)]
pub struct CliArgs {
    /// Wire protocol: JSON, SIMPLE_JSON, BINARY or COMPACT (case-insensitive)
    pub protocol: String,

    /// TCP port to listen on
    pub port: String,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Largest request accepted, in bytes
    #[arg(long)]
    pub max_message_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Largest request accepted, in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            max_message_size: default_max_message_size(),
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

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_max_message_size() -> usize {
    16 * 1024 * 1024 // 16 MB
}

pub fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub max_message_size: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from the process arguments and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(std::env::args_os())
    }

    /// Load configuration from `args`, the first of which is the program name.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cli = CliArgs::try_parse_from(args)?;

        // Validate positionals before touching the filesystem
        let protocol: Protocol = cli.protocol.parse()?;
        let port = parse_port(&cli.port)?;

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let max_message_size = cli
            .max_message_size
            .unwrap_or(toml_config.server.max_message_size);
        if max_message_size == 0 {
            return Err(ConfigError::InvalidMaxMessageSize);
        }

        Ok(Config {
            protocol,
            host: cli.host.unwrap_or(toml_config.server.host),
            port,
            max_message_size,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }

    /// `host:port`, with IPv6 hosts bracketed.
    pub fn listen_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// A TCP port between 1 and 65535.
pub fn parse_port(value: &str) -> Result<u16, ConfigError> {
    match value.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(ConfigError::InvalidPort(value.to_string())),
        Ok(port) => Ok(port),
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Arguments did not match the command line grammar, or help or the
    /// version was requested.
    #[error(transparent)]
    Usage(#[from] clap::Error),

    #[error(transparent)]
    UnknownProtocol(#[from] UnknownProtocol),

    #[error("invalid port '{0}' (expected an integer between 1 and 65535)")]
    InvalidPort(String),

    #[error("max_message_size must be at least 1 byte")]
    InvalidMaxMessageSize,

    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
}
