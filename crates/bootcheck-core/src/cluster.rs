//! Cluster client abstraction.
//!
//! A client is bound to a single namespace. Implementations must be safe to
//! share between concurrently running verification attempts.

use crate::error::Result;
use crate::vm::{VirtualMachine, VirtualMachineInstance};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Shared cluster client trait object.
pub type DynClusterClient = Arc<dyn ClusterClient>;

/// VM operations against a cluster namespace.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Submits a VM definition and returns the created object.
    async fn create_vm(&self, vm: &VirtualMachine) -> Result<VirtualMachine>;

    /// Fetches a VM.
    async fn get_vm(&self, name: &str) -> Result<VirtualMachine>;

    /// Deletes a VM. A zero `grace_period` forces immediate removal.
    async fn delete_vm(&self, name: &str, grace_period: Duration) -> Result<()>;

    /// Fetches the running instance of a VM.
    async fn get_vmi(&self, name: &str) -> Result<VirtualMachineInstance>;
}
