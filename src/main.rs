//! echo-relay: a TCP echo server
//!
//! Every chunk a client sends is logged and written back unchanged.
//!
//! Features:
//! - Serial runtime: one connection at a time on a single blocking thread
//! - Concurrent runtime: one tokio task per connection, capped
//! - `probe` subcommand to check a running echo server
//! - Configuration via CLI arguments or TOML file

mod client;
mod concurrent;
mod config;
mod listener;
mod relay;
mod server;

use clap::Parser;
use config::{CliArgs, Command, Config, RuntimeType};
use server::EchoListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn main() -> Result<(), BoxError> {
    let cli = CliArgs::parse();

    // The probe client never reads the server config file
    if cli.command.is_some() {
        init_logging(cli.log_level.as_deref().unwrap_or("info"));
        if let Some(matched) = run_command(&cli) {
            if matched? {
                return Ok(());
            }
            std::process::exit(1);
        }
    }

    let config = Config::load(&cli)?;
    init_logging(&config.log_level);

    info!(
        host = %config.host,
        port = config.port,
        chunk_size = config.chunk_size,
        runtime = ?config.runtime,
        "Starting echo-relay server"
    );

    match config.runtime {
        RuntimeType::Serial => run_serial(config),
        RuntimeType::Concurrent => run_concurrent(config),
    }
}

/// Run the subcommand, if any. `Some(Ok(false))` means the echo did not match.
fn run_command(cli: &CliArgs) -> Option<std::io::Result<bool>> {
    match &cli.command {
        Some(Command::Probe { target, message }) => Some(client::run(target, message)),
        None => None,
    }
}

/// Initialize logging, with `RUST_LOG` taking precedence over `level`
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Serve one connection at a time on this thread
fn run_serial(config: Config) -> Result<(), BoxError> {
    let server = EchoListener::bind(&config)?;
    server.run();
    Ok(())
}

/// Serve each connection on its own tokio task
fn run_concurrent(config: Config) -> Result<(), BoxError> {
    info!(max_connections = config.max_connections, "Using tokio runtime");
    concurrent::run(&config)
}
