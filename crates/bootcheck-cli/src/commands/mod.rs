//! CLI command implementations.
//!
//! - `verify`: boot and check every published, unverified artifact
//! - `status`: show the results ledger

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub mod status;
pub mod verify;

/// bootcheck - boot verification of published VM disk images
#[derive(Parser)]
#[command(name = "bootcheck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file layered over the system and user files
    #[arg(long, global = true, env = "BOOTCHECK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "table")]
    pub format: OutputFormat,

    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Verify published artifacts by booting them on KubeVirt
    Verify(verify::VerifyArgs),

    /// Show recorded verification results
    Status(status::StatusArgs),

    /// Show version information
    Version,
}
