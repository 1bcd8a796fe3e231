//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// Plantwatch - industrial asset-monitoring ingest
///
/// Replays telemetry, anomaly and inspection events, persists them,
/// batches them into the search index and live channel, and writes a
/// dashboard KPI report.
///
/// Examples:
///   plantwatch --input events.jsonl
///   plantwatch --input recordings/ --rate 200 --live
///   cat events.jsonl | plantwatch --input - --format json --output kpis.json
///   plantwatch --input events.jsonl --dry-run
///   plantwatch --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Event source: a JSON Lines file, a directory of them, or `-` for stdin
    #[arg(short, long, value_name = "PATH", required_unless_present = "init_config")]
    pub input: Option<String>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .plantwatch.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory for the durable event logs
    #[arg(long, value_name = "DIR", env = "PLANTWATCH_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Output file path for the KPI report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Replay rate in events per second (0 = as fast as possible)
    #[arg(long, default_value = "0", value_name = "EVENTS")]
    pub rate: u64,

    /// Print every live update pushed to dashboard subscribers
    #[arg(long)]
    pub live: bool,

    /// fsync the event logs after every write
    #[arg(long)]
    pub sync_writes: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Dry run: parse and validate the input without persisting anything
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .plantwatch.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The input path; empty when only `--init-config` was given.
    pub fn input_path(&self) -> &str {
        self.input.as_deref().unwrap_or("")
    }

    /// Whether events come from stdin.
    pub fn reads_stdin(&self) -> bool {
        self.input_path() == "-"
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        let input = self.input_path();
        if input.is_empty() {
            return Err("An input path is required (use - for stdin)".to_string());
        }
        if !self.reads_stdin() && !std::path::Path::new(input).exists() {
            return Err(format!("Input path does not exist: {}", input));
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }
        if self.live && self.dry_run {
            return Err("--live has nothing to show during --dry-run".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
