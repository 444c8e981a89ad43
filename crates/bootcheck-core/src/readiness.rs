//! Polling a VM until the cluster reports it ready.

use crate::cluster::ClusterClient;
use crate::error::{CoreError, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default interval between readiness polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of a readiness wait that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The VM reported ready.
    Ready,
    /// The wait was cancelled before the VM became ready.
    Cancelled,
}

/// Polls `name` every `interval` until it reports ready.
///
/// The first poll happens immediately. The whole wait, including time spent
/// inside the fetch calls, is bounded by `timeout`.
///
/// # Errors
///
/// Returns a timeout error if the VM is not ready within `timeout`, or the
/// fetch error if the VM cannot be read. Fetch errors are not retried.
pub async fn wait_vm_ready(
    client: &dyn ClusterClient,
    name: &str,
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Readiness> {
    let poll = async {
        loop {
            let vm = client.get_vm(name).await?;
            if vm.is_ready() {
                return Ok(Readiness::Ready);
            }
            tracing::trace!(vm = %name, "VM not ready yet");
            tokio::time::sleep(interval).await;
        }
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => Ok(Readiness::Cancelled),
        outcome = tokio::time::timeout(timeout, poll) => match outcome {
            Ok(result) => result,
            Err(_) => Err(CoreError::timeout(format!(
                "VM {name} not ready after {}s",
                timeout.as_secs()
            ))),
        },
    }
}
