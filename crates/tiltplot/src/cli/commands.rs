//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands and the parsers
//! for the values they take.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Subcommand, ValueEnum};

use crate::error::{Error, Result};
use crate::model::{NewInstrument, PlotId, TimeWindow};
use crate::query::Resolution;

/// Measurement ingestion arguments.
#[derive(Debug, Args)]
pub struct IngestCommand {
    /// Device key of the user the samples belong to
    #[arg(short, long, value_name = "KEY")]
    pub device_key: String,

    /// JSON file holding an array of `{key, value, timestamp}` samples
    /// (reads stdin when omitted)
    #[arg(short, long, value_name = "FILE")]
    pub file: Option<PathBuf>,
}

/// Plot management commands.
#[derive(Debug, Subcommand)]
pub enum PlotsCommand {
    /// List your plots, most recent first
    List {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show a plot and its instruments
    Show {
        /// Plot id
        id: PlotId,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Create a plot
    Create {
        /// Display name
        name: String,

        /// Start of the plot (RFC 3339, defaults to now)
        #[arg(long, value_parser = parse_timestamp)]
        start: Option<DateTime<Utc>>,

        /// End of the plot (RFC 3339); omit for an active plot
        #[arg(long, value_parser = parse_timestamp)]
        end: Option<DateTime<Utc>>,

        /// Instrument as `key[:name[:type]]` (repeatable)
        #[arg(short, long = "instrument", value_parser = parse_instrument)]
        instruments: Vec<NewInstrument>,
    },

    /// Rename or re-window a plot
    Update {
        /// Plot id
        id: PlotId,

        /// New display name
        #[arg(long)]
        name: Option<String>,

        /// New start (RFC 3339)
        #[arg(long, value_parser = parse_timestamp)]
        start: Option<DateTime<Utc>>,

        /// New end (RFC 3339)
        #[arg(long, value_parser = parse_timestamp, conflicts_with = "reopen")]
        end: Option<DateTime<Utc>>,

        /// Clear the end time so the plot records again
        #[arg(long)]
        reopen: bool,
    },

    /// Add instruments to a plot
    AddInstrument {
        /// Plot id
        id: PlotId,

        /// Instrument as `key[:name[:type]]` (repeatable)
        #[arg(required = true, value_parser = parse_instrument)]
        instruments: Vec<NewInstrument>,
    },

    /// Issue a public share link for a plot
    Share {
        /// Plot id
        id: PlotId,
    },

    /// Revoke a plot's share link
    Unshare {
        /// Plot id
        id: PlotId,
    },
}

/// Which plot a read targets: one of yours by id, or a shared one by link.
#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct PlotTarget {
    /// Plot id (requires --token)
    pub id: Option<PlotId>,

    /// Share link uuid
    #[arg(long, value_name = "UUID")]
    pub share: Option<String>,
}

/// Series read arguments.
#[derive(Debug, Args)]
pub struct DataCommand {
    /// The plot to read
    #[command(flatten)]
    pub target: PlotTarget,

    /// Window start (RFC 3339, defaults to the epoch)
    #[arg(long, value_parser = parse_timestamp)]
    pub start: Option<DateTime<Utc>>,

    /// Window end (RFC 3339, defaults to now)
    #[arg(long, value_parser = parse_timestamp)]
    pub end: Option<DateTime<Utc>>,

    /// Series resolution
    #[arg(short, long, default_value = "all", value_parser = parse_resolution)]
    pub resolution: Resolution,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

impl DataCommand {
    /// The requested window, defaulting to `[epoch, now)`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the end is before the start.
    pub fn window(&self, now: DateTime<Utc>) -> Result<TimeWindow> {
        TimeWindow::new(
            self.start.unwrap_or(DateTime::UNIX_EPOCH),
            self.end.unwrap_or(now),
        )
    }
}

/// Latest-value read arguments.
#[derive(Debug, Args)]
pub struct LatestCommand {
    /// The plot to read
    #[command(flatten)]
    pub target: PlotTarget,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Output format for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Aligned columns, one row per timestamp
    #[default]
    Table,
    /// Comma-separated values with a header row
    Csv,
    /// JSON output
    Json,
}

/// Parse an RFC 3339 timestamp.
///
/// # Errors
///
/// Returns `InvalidInput` if the value is not RFC 3339.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::invalid_input(format!("invalid timestamp '{value}' (expected RFC 3339): {e}")))
}

/// Parse a resolution name, ignoring case.
///
/// # Errors
///
/// Returns `InvalidInput` for anything but `all`, `minute`, `hour` or `day`.
pub fn parse_resolution(value: &str) -> Result<Resolution> {
    value.parse()
}

/// Parse `key[:name[:type]]`. The name defaults to the key.
///
/// # Errors
///
/// Returns `InvalidInput` if the key is empty.
pub fn parse_instrument(value: &str) -> Result<NewInstrument> {
    let mut parts = value.splitn(3, ':');
    let key = parts.next().unwrap_or_default().trim();
    if key.is_empty() {
        return Err(Error::invalid_input(format!(
            "instrument '{value}' has an empty key"
        )));
    }
    let name = parts.next().map(str::trim).filter(|n| !n.is_empty()).unwrap_or(key);
    let kind = parts.next().map(str::trim).unwrap_or_default();
    Ok(NewInstrument::new(key, name, kind))
}
