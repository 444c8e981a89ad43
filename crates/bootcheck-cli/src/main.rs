//! bootcheck CLI - boot verification of published VM disk images.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Targets are matched by prefix, so this covers every workspace crate.
    let filter = if cli.debug {
        "bootcheck=debug"
    } else {
        "bootcheck=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Verify(args) => {
            commands::verify::execute(args, cli.config.as_deref(), cli.format).await
        }
        Commands::Status(args) => commands::status::execute(args, cli.format),
        Commands::Version => {
            println!("bootcheck {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
