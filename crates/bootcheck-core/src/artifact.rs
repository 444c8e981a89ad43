//! Artifact contract.
//!
//! An artifact is one image-producing definition in the catalog. It owns the
//! shape of its verification VM, how guest-init data is rendered for it and
//! the ordered list of in-guest checks that must pass.

use crate::credentials::Credentials;
use crate::error::Result;
use crate::vm::{VirtualMachine, VirtualMachineInstance};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared artifact trait object.
pub type DynArtifact = Arc<dyn Artifact>;

/// Shared test trait object.
pub type DynArtifactTest = Arc<dyn ArtifactTest>;

/// Identity of an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMetadata {
    /// Human name, used as the base of generated VM names.
    pub name: String,
    /// Stable identity, used as the ledger key.
    pub description: String,
}

impl ArtifactMetadata {
    /// Creates metadata whose identity equals its name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            description: name.clone(),
            name,
        }
    }

    /// Overrides the identity.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Returns the ledger key of the artifact.
    #[must_use]
    pub fn describe(&self) -> &str {
        &self.description
    }
}

/// Account and keys to provision through guest-init data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserData {
    /// Guest account name.
    pub username: String,
    /// Lines for the account's `authorized_keys`.
    pub authorized_keys: Vec<String>,
}

/// Parameters handed to every in-guest check.
#[derive(Debug, Clone, Copy)]
pub struct TestParams<'a> {
    /// Guest account to authenticate as.
    pub username: &'a str,
    /// Credentials provisioned for this attempt.
    pub credentials: &'a Credentials,
}

/// An in-guest check.
#[async_trait]
pub trait ArtifactTest: Send + Sync {
    /// Short name used in logs and failures.
    fn name(&self) -> &str;

    /// Runs the check against a live instance.
    ///
    /// Implementations that wait or retry should observe `cancel`; returning
    /// early on cancellation is fine, the caller re-checks the token.
    async fn run(
        &self,
        cancel: &CancellationToken,
        vmi: &VirtualMachineInstance,
        params: &TestParams<'_>,
    ) -> Result<()>;
}

/// An image-producing definition.
pub trait Artifact: Send + Sync {
    /// Returns the artifact identity.
    fn metadata(&self) -> &ArtifactMetadata;

    /// Builds the verification VM.
    ///
    /// # Errors
    ///
    /// Returns an error if the definition cannot be built.
    fn vm(&self, name: &str, image_ref: &str, user_data: &str) -> Result<VirtualMachine>;

    /// Renders guest-init data provisioning `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering fails.
    fn user_data(&self, data: &UserData) -> Result<String>;

    /// Returns the checks to run, in order.
    fn tests(&self) -> Vec<DynArtifactTest>;
}
