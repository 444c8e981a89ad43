//! Status command implementation.

use super::OutputFormat;
use anyhow::{Context, Result};
use bootcheck_core::{JsonLedgerFile, Ledger, LedgerStore};
use clap::Args;
use std::path::PathBuf;

/// Arguments for the status command.
#[derive(Args)]
pub struct StatusArgs {
    /// Results ledger to show
    #[arg(long)]
    pub results_file: PathBuf,

    /// Only show artifacts that are not verified yet
    #[arg(long)]
    pub pending: bool,
}

/// Executes the status command.
pub fn execute(args: StatusArgs, format: OutputFormat) -> Result<()> {
    let ledger = JsonLedgerFile::new(&args.results_file)
        .load()
        .with_context(|| format!("Failed to read {}", args.results_file.display()))?;

    let ledger: Ledger = ledger
        .into_iter()
        .filter(|(_, result)| !args.pending || !result.verified)
        .collect();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&ledger)?),
        OutputFormat::Table => print!("{}", render_table(&ledger)),
    }
    Ok(())
}

fn render_table(ledger: &Ledger) -> String {
    let mut out = format!("{:<32} {:<10} {}\n", "ARTIFACT", "VERIFIED", "TAGS");
    for (key, result) in ledger {
        let verified = if result.verified { "yes" } else { "no" };
        let tags = if result.tags.is_empty() {
            "-".to_string()
        } else {
            result.tags.join(",")
        };
        out.push_str(&format!("{key:<32} {verified:<10} {tags}\n"));
    }
    out
}
