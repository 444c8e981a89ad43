//! Verify command implementation.

use super::OutputFormat;
use anyhow::{Context, Result};
use bootcheck_core::{
    CatalogFile, JsonLedgerFile, KubectlClient, Orchestrator, RunSummary, SshShellFactory,
    Verifier, VerifyConfig, WorkerPool,
};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Arguments for the verify command.
///
/// Unset flags fall back to the configuration files and environment.
#[derive(Args)]
pub struct VerifyArgs {
    /// Results ledger to read and update
    #[arg(long)]
    pub results_file: PathBuf,

    /// Artifact catalog (TOML)
    #[arg(long)]
    pub catalog: PathBuf,

    /// Registry prefix for image references [default: quay.io/containerdisks]
    #[arg(long)]
    pub registry: Option<String>,

    /// Namespace to create VMs in [default: kubevirt]
    #[arg(long)]
    pub namespace: Option<String>,

    /// Seconds to wait for each VM to become ready [default: 600]
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Number of artifacts verified concurrently [default: 3]
    #[arg(long)]
    pub workers: Option<usize>,

    /// Kubeconfig file
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context
    #[arg(long)]
    pub context: Option<String>,
}

impl VerifyArgs {
    /// Applies flags on top of the loaded configuration.
    fn apply(&self, config: &mut VerifyConfig) {
        if let Some(registry) = &self.registry {
            config.registry.clone_from(registry);
        }
        if let Some(namespace) = &self.namespace {
            config.namespace.clone_from(namespace);
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(kubeconfig) = &self.kubeconfig {
            config.kubectl.kubeconfig = Some(kubeconfig.clone());
        }
        if let Some(context) = &self.context {
            config.kubectl.context = Some(context.clone());
        }
    }
}

/// Executes the verify command.
pub async fn execute(
    args: VerifyArgs,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let mut config = VerifyConfig::load(config_path).context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let catalog = CatalogFile::load(&args.catalog)
        .with_context(|| format!("Failed to load catalog {}", args.catalog.display()))?;
    let artifacts = catalog.into_ssh_artifacts(SshShellFactory::new(config.ssh.clone()));

    let client = Arc::new(KubectlClient::new(
        config.kubectl.clone(),
        config.namespace.clone(),
    ));
    let orchestrator = Orchestrator::new(
        Verifier::new(client, config.verify_options()),
        WorkerPool::new(config.workers),
        Arc::new(JsonLedgerFile::new(&args.results_file)),
    );

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            warn!("Shutdown signal received, cancelling verification");
            cancel.cancel();
        }
    });

    let summary = orchestrator
        .run(&cancel, &artifacts)
        .await
        .context("Verification run failed")?;
    watcher.abort();

    print_summary(&summary, format);
    if summary.cancelled {
        anyhow::bail!("verification interrupted");
    }
    summary.into_result()?;
    Ok(())
}

fn print_summary(summary: &RunSummary, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let failures: Vec<_> = summary
                .failures
                .iter()
                .map(|f| serde_json::json!({ "artifact": f.key, "error": f.error.to_string() }))
                .collect();
            let value = serde_json::json!({
                "dispatched": summary.dispatched,
                "verified": summary.verified,
                "skipped": summary.skipped,
                "cancelled": summary.cancelled,
                "failures": failures,
            });
            println!("{value:#}");
        }
        OutputFormat::Table => {
            println!(
                "{:<12} {:<10} {:<10} {:<10}",
                "DISPATCHED", "VERIFIED", "FAILED", "SKIPPED"
            );
            println!(
                "{:<12} {:<10} {:<10} {:<10}",
                summary.dispatched,
                summary.verified,
                summary.failures.len(),
                summary.skipped
            );
            for failure in &summary.failures {
                println!("{}: {}", failure.key, failure.error);
            }
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
