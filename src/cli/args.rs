//! CLI argument definitions
//!
//! All Clap derive structs for `rupture` command-line parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::observability::LogFormat;

// ============================================================================
// Root CLI
// ============================================================================

/// Shared-gaze installation server.
#[derive(Parser, Debug)]
#[command(name = "rupture", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "RUPTURE_COLOR")]
    pub color: ColorChoice,

    /// Log line format.
    #[arg(long, default_value = "human", global = true, env = "RUPTURE_LOG_FORMAT")]
    pub log_format: OutputFormat,
}

// ============================================================================
// Top-Level Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the installation server until interrupted.
    Serve(ServeArgs),

    /// Validate configuration files without starting the server.
    Validate(ValidateArgs),

    /// Display version information.
    Version(VersionArgs),
}

/// Arguments for `serve`.
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Path to YAML configuration file.
    #[arg(short, long, env = "RUPTURE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen on `[host:]port`, overriding `server.bind`.
    #[arg(short, long, env = "RUPTURE_BIND")]
    pub bind: Option<String>,

    /// Serve Prometheus metrics on `127.0.0.1:<port>`.
    #[arg(long, env = "RUPTURE_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Write the JSONL event stream to this file instead of discarding it.
    #[arg(long, env = "RUPTURE_EVENTS_FILE")]
    pub events_file: Option<PathBuf>,

    /// Seed for gaze angles, overriding `session.seed`.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Static client asset directory, overriding `server.public_dir`.
    #[arg(long, env = "RUPTURE_PUBLIC_DIR")]
    pub public_dir: Option<PathBuf>,
}

/// Arguments for `validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Configuration files to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Treat warnings as errors.
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for version display.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Output format for structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}

impl From<OutputFormat> for LogFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Human => Self::Human,
            OutputFormat::Json => Self::Json,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
