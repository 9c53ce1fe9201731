//! Herdsman - multi-host orchestration engine
//!
//! This is the main entry point for the Herdsman CLI.

mod cli;

use std::fs::OpenOptions;
use std::sync::Arc;

use anyhow::{Context, Result};
use cli::commands::CommandContext;
use cli::{Cli, Commands};
use herdsman::config::{Config, LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Application version information
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    let mut config = Config::load(cli.config.as_ref())?;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    init_logging(cli.verbosity(), &config.logging)?;

    if cli.verbosity() >= 2 {
        eprintln!("herdsman v{}", VERSION);
    }

    let ctx = CommandContext::new(&cli, config);

    let exit_code = match &cli.command {
        Commands::Run(args) => args.execute(&ctx).await?,
        Commands::Copy(args) => args.execute(&ctx).await?,
        Commands::Hosts(args) => args.execute(&ctx).await?,
    };

    std::process::exit(exit_code);
}

/// Initialize logging from verbosity and the logging config.
///
/// `RUST_LOG` wins over both.
fn init_logging(verbosity: u8, logging: &LoggingConfig) -> Result<()> {
    let filter = match verbosity {
        0 => logging.level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let writer = match &logging.log_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            fmt::writer::BoxMakeWriter::new(Arc::new(file))
        }
        None => fmt::writer::BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    match logging.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(writer))
            .init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_target(verbosity >= 3)
                    .with_ansi(logging.log_path.is_none())
                    .with_writer(writer),
            )
            .init(),
    }
    Ok(())
}
