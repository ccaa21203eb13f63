//! Command-line interface for tiltplot.
//!
//! This module provides the CLI structure for the `tiltctl` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::auth::Credentials;
use crate::logging::Verbosity;

pub use commands::{
    parse_instrument, parse_resolution, parse_timestamp, ConfigCommand, DataCommand,
    IngestCommand, LatestCommand, OutputFormat, PlotTarget, PlotsCommand, StatusCommand,
};

/// tiltctl - Record and chart sensor plots
///
/// Ingests measurements from devices, manages plots and their instruments,
/// and reads plot series at raw, minute, hour, or day resolution.
#[derive(Debug, Parser)]
#[command(name = "tiltctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Bearer token identifying you for plot commands
    #[arg(short, long, global = true, value_name = "TOKEN")]
    pub token: Option<String>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store measurements sent by a device
    Ingest(IngestCommand),

    /// Manage plots
    #[command(subcommand)]
    Plots(PlotsCommand),

    /// Read a plot's series
    Data(DataCommand),

    /// Read a plot's most recent values
    Latest(LatestCommand),

    /// Print your device key
    Key,

    /// Show database status
    Status(StatusCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Logging verbosity from `-q` and `-v`.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }

    /// Bearer credentials from `--token`.
    #[must_use]
    pub fn bearer(&self) -> Credentials {
        Credentials::BearerToken(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Resolution;
    use clap::CommandFactory;

    fn cli(verbose: u8, quiet: bool) -> Cli {
        Cli {
            config: None,
            token: None,
            verbose,
            quiet,
            command: Command::Status(StatusCommand { json: false }),
        }
    }

    #[test]
    fn test_cli_name() {
        let cli = Cli::command();
        assert_eq!(cli.get_name(), "tiltctl");
    }

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(cli(0, true).verbosity(), Verbosity::Quiet);
        assert_eq!(cli(0, false).verbosity(), Verbosity::Normal);
        assert_eq!(cli(1, false).verbosity(), Verbosity::Verbose);
        assert_eq!(cli(2, false).verbosity(), Verbosity::Trace);
    }

    #[test]
    fn test_cli_verify() {
        // Verify the CLI structure is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ingest() {
        let cli = Cli::try_parse_from(["tiltctl", "ingest", "--device-key", "abc", "-f", "x.json"])
            .unwrap();
        let Command::Ingest(cmd) = cli.command else {
            panic!("expected ingest");
        };
        assert_eq!(cmd.device_key, "abc");
        assert_eq!(cmd.file, Some(PathBuf::from("x.json")));
    }

    #[test]
    fn test_parse_plots_create() {
        let cli = Cli::try_parse_from([
            "tiltctl",
            "--token",
            "t",
            "plots",
            "create",
            "brew",
            "--start",
            "2023-01-01T00:00:00Z",
            "-i",
            "temp:Temperature:temperature_celsius",
            "-i",
            "gravity",
        ])
        .unwrap();
        assert_eq!(cli.bearer(), Credentials::BearerToken(Some("t".to_string())));
        let Command::Plots(PlotsCommand::Create { instruments, .. }) = cli.command else {
            panic!("expected plots create");
        };
        assert_eq!(instruments.len(), 2);
    }

    #[test]
    fn test_parse_plots_update_reopen_conflicts_with_end() {
        let result = Cli::try_parse_from([
            "tiltctl",
            "plots",
            "update",
            "1",
            "--end",
            "2023-01-01T00:00:00Z",
            "--reopen",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_data_with_share_link() {
        let cli = Cli::try_parse_from([
            "tiltctl",
            "data",
            "--share",
            "1b4e28ba-2fa1-11d2-883f-0016d3cca427",
            "-r",
            "hour",
        ])
        .unwrap();
        let Command::Data(cmd) = cli.command else {
            panic!("expected data");
        };
        assert!(cmd.target.id.is_none());
        assert_eq!(cmd.resolution, Resolution::Hour);
    }

    #[test]
    fn test_parse_data_resolution_names() {
        let cli = Cli::try_parse_from(["tiltctl", "data", "7", "--resolution", "Day"]).unwrap();
        let Command::Data(cmd) = cli.command else {
            panic!("expected data");
        };
        assert_eq!(cmd.resolution, Resolution::Day);

        let cli = Cli::try_parse_from(["tiltctl", "data", "7"]).unwrap();
        let Command::Data(cmd) = cli.command else {
            panic!("expected data");
        };
        assert_eq!(cmd.resolution, Resolution::All);

        assert!(Cli::try_parse_from(["tiltctl", "data", "7", "-r", "week"]).is_err());
    }

    #[test]
    fn test_parse_data_requires_target() {
        assert!(Cli::try_parse_from(["tiltctl", "data"]).is_err());
        assert!(Cli::try_parse_from(["tiltctl", "data", "1", "--share", "x"]).is_err());
    }

    #[test]
    fn test_parse_rejects_bad_timestamp() {
        assert!(Cli::try_parse_from(["tiltctl", "data", "1", "--start", "soon"]).is_err());
    }

    #[test]
    fn test_parse_with_config() {
        let cli = Cli::try_parse_from(["tiltctl", "-c", "/custom/config.toml", "status"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
    }

    #[test]
    fn test_parse_key() {
        let cli = Cli::try_parse_from(["tiltctl", "key", "--token", "t"]).unwrap();
        assert!(matches!(cli.command, Command::Key));
        assert!(cli.token.is_some());
    }
}
