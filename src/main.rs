//! enum-echo: Thrift echo server for cross-language interoperability tests
//!
//! Usage: `enum-echo <protocol> <port>`
//!
//! Serves the `echo` method over one of the JSON, SIMPLE_JSON, BINARY or
//! COMPACT protocols, one connection at a time, until killed.

use enum_echo::config::{default_log_level, Config, ConfigError};
use enum_echo::server::Server;
use enum_echo::service::EchoHandler;
use std::io::IsTerminal;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        // --help and --version
        Err(ConfigError::Usage(e)) if !e.use_stderr() => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(ConfigError::Usage(e)) => {
            init_logging(&default_log_level());
            warn!("Expects <protocol> <port> arguments.");
            let _ = e.print();
            return ExitCode::FAILURE;
        }
        Err(e) => {
            init_logging(&default_log_level());
            error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.log_level);

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stdout().is_terminal())
        .init();
}

fn run(config: Config) -> enum_echo::Result<()> {
    info!(
        host = %config.host,
        port = config.port,
        protocol = %config.protocol,
        max_message_size = config.max_message_size,
        "Preparing to start echo service"
    );

    let server = Server::bind(&config, EchoHandler::new(config.protocol))?;
    info!(
        "Provisioned everything; now serving {} requests on {}...",
        config.protocol, config.port
    );

    let result = server.serve();
    info!("Closing down everything.");
    result
}
