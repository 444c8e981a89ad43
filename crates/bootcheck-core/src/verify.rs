//! Verification of a single artifact.
//!
//! One attempt walks a fixed sequence:
//!
//! ```text
//!  precheck ─► plan ─► [cancel?] ─► create ─┬─► [cancel?] ─► wait ready
//!                                           │        │
//!                                    VmLease│        ▼
//!                                           │   fetch VMI ─► [cancel?] ─► tests ─► verified
//!                                           │                                │
//!                                           └──────────── delete ◄───────────┘
//! ```
//!
//! The lease is taken before the create call; only a create the cluster
//! rejected outright skips deletion. From there on deletion runs on every
//! exit path. A cancelled attempt returns `Ok(None)`: no result and no
//! error.

use crate::artifact::{Artifact, TestParams};
use crate::cluster::DynClusterClient;
use crate::credentials::Credentials;
use crate::error::Result;
use crate::ledger::ArtifactResult;
use crate::readiness::{self, Readiness};
use crate::vm_spec::{self, VERIFY_USERNAME};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Default time to wait for a VM to become ready.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(600);

/// Knobs for verification attempts.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Registry prefix joined with the first tag to form the image reference.
    pub registry: String,
    /// Maximum time to wait for readiness.
    pub ready_timeout: Duration,
    /// Interval between readiness polls.
    pub poll_interval: Duration,
    /// Guest account used for checks.
    pub username: String,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            registry: String::new(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            poll_interval: readiness::DEFAULT_POLL_INTERVAL,
            username: VERIFY_USERNAME.to_string(),
        }
    }
}

/// How the post-create stages ended when nothing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    Passed,
    Cancelled,
}

/// Runs verification attempts against a cluster.
pub struct Verifier {
    client: DynClusterClient,
    options: VerifyOptions,
}

impl Verifier {
    /// Creates a new verifier.
    #[must_use]
    pub fn new(client: DynClusterClient, options: VerifyOptions) -> Self {
        Self { client, options }
    }

    /// Returns the options.
    #[must_use]
    pub fn options(&self) -> &VerifyOptions {
        &self.options
    }

    /// Verifies `artifact` using the tags recorded in `candidate`.
    ///
    /// Returns `Ok(Some(result))` with `verified = true` when every check
    /// passed, and `Ok(None)` when there was nothing to verify or the attempt
    /// was cancelled.
    ///
    /// # Errors
    ///
    /// Returns the first setup, cluster, timeout or check error. Errors from
    /// deleting the VM are logged and never returned.
    pub async fn verify(
        &self,
        cancel: &CancellationToken,
        artifact: &dyn Artifact,
        candidate: &ArtifactResult,
    ) -> Result<Option<ArtifactResult>> {
        let span = tracing::info_span!("verify", artifact = %artifact.metadata().describe());
        self.attempt(cancel, artifact, candidate)
            .instrument(span)
            .await
    }

    async fn attempt(
        &self,
        cancel: &CancellationToken,
        artifact: &dyn Artifact,
        candidate: &ArtifactResult,
    ) -> Result<Option<ArtifactResult>> {
        let Some(tag) = candidate.tags.first() else {
            tracing::info!("No images to verify");
            return Ok(None);
        };

        let image_ref = vm_spec::image_reference(&self.options.registry, tag);
        let plan = vm_spec::plan_vm(artifact, &image_ref, &self.options.username)
            .inspect_err(|e| tracing::error!(error = %e, "Failed to create VM definition"))?;
        if cancel.is_cancelled() {
            return Ok(None);
        }

        tracing::info!(vm = %plan.name, image = %image_ref, "Creating VM");
        let lease = VmLease::new(self.client.clone(), plan.name.clone());
        match self.client.create_vm(&plan.vm).await {
            Ok(created) => tracing::debug!(vm = %created.name(), "VM created"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to create VM");
                if e.submitted_vm().is_some() {
                    lease.release().await;
                } else {
                    lease.dismiss();
                }
                return Err(e);
            }
        }

        let outcome = self
            .exercise(cancel, artifact, lease.name(), &plan.credentials)
            .await;
        lease.release().await;

        match outcome? {
            Completion::Passed => {
                tracing::info!("Tests successful");
                Ok(Some(ArtifactResult::verified(candidate.tags.clone())))
            }
            Completion::Cancelled => Ok(None),
        }
    }

    /// Runs every stage between creation and deletion.
    async fn exercise(
        &self,
        cancel: &CancellationToken,
        artifact: &dyn Artifact,
        name: &str,
        credentials: &Credentials,
    ) -> Result<Completion> {
        if cancel.is_cancelled() {
            return Ok(Completion::Cancelled);
        }

        tracing::info!("Waiting for VM to be ready");
        let readiness = readiness::wait_vm_ready(
            self.client.as_ref(),
            name,
            self.options.poll_interval,
            self.options.ready_timeout,
            cancel,
        )
        .await;
        match readiness {
            Ok(Readiness::Ready) => {}
            Ok(Readiness::Cancelled) => return Ok(Completion::Cancelled),
            Err(_) if cancel.is_cancelled() => return Ok(Completion::Cancelled),
            Err(e) => {
                tracing::error!(error = %e, "VM not ready");
                return Err(e);
            }
        }

        let vmi = self
            .client
            .get_vmi(name)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to get VMI"))?;
        if cancel.is_cancelled() {
            return Ok(Completion::Cancelled);
        }

        tracing::info!("Running tests on VMI");
        let params = TestParams {
            username: &self.options.username,
            credentials,
        };
        for test in artifact.tests() {
            tracing::debug!(test = test.name(), "Running test");
            if let Err(e) = test.run(cancel, &vmi, &params).await {
                if cancel.is_cancelled() {
                    return Ok(Completion::Cancelled);
                }
                tracing::error!(test = test.name(), error = %e, "Failed to verify image");
                return Err(e);
            }
            if cancel.is_cancelled() {
                return Ok(Completion::Cancelled);
            }
        }

        Ok(Completion::Passed)
    }
}

/// Grace period used when deleting verification VMs.
const DELETE_GRACE_PERIOD: Duration = Duration::ZERO;

/// Ownership of a created VM.
///
/// [`release`](Self::release) deletes the VM. If the lease is dropped
/// without being released (the attempt's future was dropped or panicked),
/// deletion is spawned onto the current runtime instead.
pub struct VmLease {
    client: DynClusterClient,
    name: String,
    released: bool,
}

impl VmLease {
    /// Takes ownership of the VM called `name`.
    #[must_use]
    pub fn new(client: DynClusterClient, name: String) -> Self {
        Self {
            client,
            name,
            released: false,
        }
    }

    /// Returns the VM name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deletes the VM with zero grace period. Failures are logged.
    ///
    /// If this future is dropped before the delete call returns, the lease's
    /// drop issues the delete again.
    pub async fn release(mut self) {
        delete_vm(&self.client, &self.name).await;
        self.released = true;
    }

    /// Gives up the lease without deleting, for a VM that was never created.
    pub fn dismiss(mut self) {
        self.released = true;
    }
}

impl Drop for VmLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let client = self.client.clone();
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { delete_vm(&client, &name).await }.in_current_span());
            }
            Err(_) => {
                tracing::error!(vm = %name, "No runtime to delete VM, it must be removed manually");
            }
        }
    }
}

async fn delete_vm(client: &DynClusterClient, name: &str) {
    match client.delete_vm(name, DELETE_GRACE_PERIOD).await {
        Ok(()) => tracing::debug!(vm = %name, "Deleted VM"),
        Err(e) => tracing::error!(vm = %name, error = %e, "Failed to delete VM"),
    }
}
