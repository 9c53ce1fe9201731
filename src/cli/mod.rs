//! CLI module for Herdsman
//!
//! Argument parsing and subcommand dispatch for the `herdsman` binary.

pub mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use herdsman::config::LogFormat;
use herdsman::connection::Transport;

/// Herdsman - run commands across a cluster, role by role
#[derive(Parser, Debug, Clone)]
#[command(name = "herdsman")]
#[command(version)]
#[command(about = "Multi-host orchestration engine", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to inventory file
    #[arg(short = 'i', long, global = true, env = "HERDSMAN_INVENTORY")]
    pub inventory: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(long, global = true, default_value = "human")]
    pub output: OutputFormat,

    /// Log format (overrides the config file)
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    /// Transport for inventory hosts (overrides the config file)
    #[arg(short = 't', long, global = true, value_parser = parse_transport)]
    pub transport: Option<Transport>,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, env = "HERDSMAN_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary
    #[default]
    Human,
    /// JSON task reports for scripting
    Json,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a shell command on every host of a role
    Run(commands::run::RunArgs),

    /// Copy a local file to every host of a role
    Copy(commands::copy::CopyArgs),

    /// List inventory hosts, optionally by role
    Hosts(commands::hosts::HostsArgs),
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }

    /// Check if JSON output is requested
    pub fn is_json(&self) -> bool {
        matches!(self.output, OutputFormat::Json)
    }
}

fn parse_transport(s: &str) -> Result<Transport, String> {
    s.parse().map_err(|e: herdsman::connection::ConnectionError| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "herdsman", "-i", "inv.yml", "run", "--role", "etcd", "--retry", "3", "--serial",
            "50%", "--", "systemctl", "restart", "etcd",
        ])
        .unwrap();
        assert_eq!(cli.inventory, Some(PathBuf::from("inv.yml")));
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.role, "etcd");
                assert_eq!(args.schedule.retry, Some(3));
                assert_eq!(args.command, vec!["systemctl", "restart", "etcd"]);
                assert!(args.schedule.serial.is_some());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_verbosity_capped() {
        let cli = Cli::try_parse_from(["herdsman", "-vvvvv", "hosts"]).unwrap();
        assert_eq!(cli.verbosity(), 3);
    }

    #[test]
    fn test_transport_flag() {
        let cli = Cli::try_parse_from(["herdsman", "--transport", "local", "hosts"]).unwrap();
        assert_eq!(cli.transport, Some(Transport::Local));
        assert!(Cli::try_parse_from(["herdsman", "--transport", "telnet", "hosts"]).is_err());
    }
}
