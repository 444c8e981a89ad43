//! Verification runs over a whole catalog.
//!
//! A run loads the ledger, picks the artifacts that have published images
//! but are not yet verified, verifies them on a worker pool and writes the
//! merged ledger back, also when the run was cancelled or attempts failed.

use crate::aggregate::ResultCollector;
use crate::artifact::DynArtifact;
use crate::error::{CoreError, Result};
use crate::ledger::{ArtifactResult, Ledger, LedgerStore};
use crate::pool::{WorkItem, WorkerFailure, WorkerPool};
use crate::verify::Verifier;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// An artifact selected for verification.
pub struct Candidate {
    /// The artifact.
    pub artifact: DynArtifact,
    /// Its current ledger entry.
    pub previous: ArtifactResult,
    key: String,
}

impl Candidate {
    /// Creates a candidate.
    #[must_use]
    pub fn new(artifact: DynArtifact, previous: ArtifactResult) -> Self {
        let key = artifact.metadata().describe().to_string();
        Self {
            artifact,
            previous,
            key,
        }
    }
}

impl WorkItem for Candidate {
    fn key(&self) -> &str {
        &self.key
    }
}

/// Picks the catalog entries that need verification.
///
/// An artifact is selected when the ledger has an entry for it that is not
/// yet verified. Artifacts without an entry have published nothing.
#[must_use]
pub fn select_candidates(ledger: &Ledger, catalog: &[DynArtifact]) -> Vec<Candidate> {
    catalog
        .iter()
        .filter_map(|artifact| {
            let key = artifact.metadata().describe();
            match ledger.get(key) {
                None => {
                    tracing::debug!(artifact = %key, "Skipping, no published images");
                    None
                }
                Some(entry) if entry.verified => {
                    tracing::debug!(artifact = %key, "Skipping, already verified");
                    None
                }
                Some(entry) => Some(Candidate::new(Arc::clone(artifact), entry.clone())),
            }
        })
        .collect()
}

/// Outcome of a run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Attempts handed to the pool.
    pub dispatched: usize,
    /// Ledger entries newly marked verified.
    pub verified: usize,
    /// Attempts never started because the run was cancelled.
    pub skipped: usize,
    /// Attempts that failed.
    pub failures: Vec<WorkerFailure>,
    /// Whether the run was cancelled.
    pub cancelled: bool,
}

impl RunSummary {
    /// Folds failures into a single error.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::VerificationFailed`] if any attempt failed.
    pub fn into_result(self) -> Result<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(CoreError::VerificationFailed {
                failed: self.failures.len(),
                total: self.dispatched,
            })
        }
    }
}

/// Drives verification runs.
pub struct Orchestrator {
    verifier: Arc<Verifier>,
    pool: WorkerPool,
    store: Arc<dyn LedgerStore>,
}

impl Orchestrator {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(verifier: Verifier, pool: WorkerPool, store: Arc<dyn LedgerStore>) -> Self {
        Self {
            verifier: Arc::new(verifier),
            pool,
            store,
        }
    }

    /// Verifies every eligible artifact in `catalog`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the ledger cannot be loaded or saved.
    /// Attempt failures are reported in the summary.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        catalog: &[DynArtifact],
    ) -> Result<RunSummary> {
        let mut ledger = self.store.load()?;
        let candidates = select_candidates(&ledger, catalog);
        let dispatched = candidates.len();
        tracing::info!(
            artifacts = catalog.len(),
            candidates = dispatched,
            workers = self.pool.workers(),
            "Starting verification run"
        );

        let collector = ResultCollector::with_capacity(catalog.len());
        let sender = collector.sender();
        let verifier = Arc::clone(&self.verifier);
        let token = cancel.clone();

        let report = self
            .pool
            .run(cancel, candidates, move |candidate: Candidate| {
                let sender = sender.clone();
                let verifier = Arc::clone(&verifier);
                let cancel = token.clone();
                async move {
                    let outcome = verifier
                        .verify(&cancel, candidate.artifact.as_ref(), &candidate.previous)
                        .await?;
                    if let Some(result) = outcome {
                        sender.publish(candidate.key, result);
                    }
                    Ok(())
                }
            })
            .await;

        let verified = collector.merge_into(&mut ledger);
        self.store.save(&ledger)?;

        let summary = RunSummary {
            dispatched,
            verified,
            skipped: report.skipped,
            failures: report.failures,
            cancelled: cancel.is_cancelled(),
        };
        for failure in &summary.failures {
            tracing::error!(artifact = %failure.key, error = %failure.error, "Verification failed");
        }
        tracing::info!(
            dispatched = summary.dispatched,
            verified = summary.verified,
            failed = summary.failures.len(),
            skipped = summary.skipped,
            cancelled = summary.cancelled,
            "Verification run finished"
        );
        Ok(summary)
    }
}
