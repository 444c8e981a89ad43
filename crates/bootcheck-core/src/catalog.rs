//! Declarative artifact catalog.
//!
//! ## Example
//!
//! ```toml
//! [[artifact]]
//! name = "fedora"
//! memory = "2Gi"
//!
//! [[artifact.check]]
//! name = "ssh"
//! command = "true"
//! retry_until_ready = true
//!
//! [[artifact.check]]
//! name = "os-release"
//! command = "cat /etc/os-release"
//! expect_stdout = "Fedora"
//! ```

use crate::artifact::{
    Artifact, ArtifactMetadata, ArtifactTest, DynArtifact, DynArtifactTest, TestParams, UserData,
};
use crate::error::{CoreError, Result};
use crate::guest::{ShellFactory, SshShellFactory};
use crate::vm::{Cpu, DiskTarget, VirtualMachine, VirtualMachineInstance};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default guest memory request.
const DEFAULT_MEMORY: &str = "1Gi";

/// Default disk bus.
const DEFAULT_DISK_BUS: &str = "virtio";

/// Initial delay between attempts of a retrying check.
const RETRY_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Maximum delay between attempts of a retrying check.
const RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

/// Default total budget for a retrying check.
const DEFAULT_RETRY_BUDGET: Duration = Duration::from_secs(300);

/// Catalog file contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogFile {
    /// Artifact definitions.
    #[serde(default, rename = "artifact")]
    pub artifacts: Vec<ArtifactDefinition>,
}

/// One artifact definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDefinition {
    /// Base name for generated VMs.
    pub name: String,
    /// Ledger identity; defaults to `name`.
    #[serde(default)]
    pub description: Option<String>,
    /// Memory request.
    #[serde(default = "default_memory")]
    pub memory: String,
    /// Number of CPU cores.
    #[serde(default)]
    pub cpu_cores: Option<u32>,
    /// Bus for the image disk.
    #[serde(default = "default_disk_bus")]
    pub disk_bus: String,
    /// In-guest checks, in order.
    #[serde(default, rename = "check")]
    pub checks: Vec<CheckDefinition>,
}

/// One in-guest check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckDefinition {
    /// Check name.
    pub name: String,
    /// Shell command run as the verification user.
    pub command: String,
    /// Expected exit code.
    #[serde(default)]
    pub expect_exit: i32,
    /// Substring expected in standard output.
    #[serde(default)]
    pub expect_stdout: Option<String>,
    /// Retry until the command succeeds, e.g. while sshd is starting.
    #[serde(default)]
    pub retry_until_ready: bool,
}

fn default_memory() -> String {
    DEFAULT_MEMORY.to_string()
}

fn default_disk_bus() -> String {
    DEFAULT_DISK_BUS.to_string()
}

impl CatalogFile {
    /// Parses a catalog from TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed, an artifact has an
    /// empty name or two artifacts share an identity.
    pub fn from_toml(content: &str) -> Result<Self> {
        let catalog: Self =
            toml::from_str(content).map_err(|e| CoreError::catalog(e.to_string()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Reads a catalog file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::catalog(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for artifact in &self.artifacts {
            if artifact.name.trim().is_empty() {
                return Err(CoreError::catalog("artifact with empty name"));
            }
            let identity = artifact.identity();
            if !seen.insert(identity) {
                return Err(CoreError::catalog(format!(
                    "duplicate artifact identity '{identity}'"
                )));
            }
            for check in &artifact.checks {
                if check.command.trim().is_empty() {
                    return Err(CoreError::catalog(format!(
                        "check '{}' of '{identity}' has an empty command",
                        check.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Builds artifacts whose checks run through `shells`.
    #[must_use]
    pub fn into_artifacts(self, shells: Arc<dyn ShellFactory>) -> Vec<DynArtifact> {
        self.artifacts
            .into_iter()
            .map(|definition| {
                Arc::new(DeclaredArtifact::new(definition, Arc::clone(&shells))) as DynArtifact
            })
            .collect()
    }

    /// Builds artifacts whose checks run over SSH.
    #[must_use]
    pub fn into_ssh_artifacts(self, shells: SshShellFactory) -> Vec<DynArtifact> {
        self.into_artifacts(Arc::new(shells))
    }
}

impl ArtifactDefinition {
    /// Returns the ledger identity.
    #[must_use]
    pub fn identity(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.name)
    }
}

/// An artifact backed by a catalog definition.
pub struct DeclaredArtifact {
    metadata: ArtifactMetadata,
    definition: ArtifactDefinition,
    shells: Arc<dyn ShellFactory>,
}

impl DeclaredArtifact {
    /// Creates an artifact from its definition.
    #[must_use]
    pub fn new(definition: ArtifactDefinition, shells: Arc<dyn ShellFactory>) -> Self {
        let metadata =
            ArtifactMetadata::new(definition.name.clone()).with_description(definition.identity());
        Self {
            metadata,
            definition,
            shells,
        }
    }
}

impl Artifact for DeclaredArtifact {
    fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }

    fn vm(&self, name: &str, image_ref: &str, user_data: &str) -> Result<VirtualMachine> {
        if name.is_empty() || image_ref.is_empty() {
            return Err(CoreError::vm_spec("VM name and image reference are required"));
        }

        let mut vm = VirtualMachine::with_container_disk(name, image_ref, user_data);
        vm.metadata
            .labels
            .insert("app.kubernetes.io/managed-by".to_string(), "bootcheck".to_string());

        let domain = &mut vm.spec.template.spec.domain;
        domain
            .resources
            .requests
            .insert("memory".to_string(), self.definition.memory.clone());
        domain.cpu = self.definition.cpu_cores.map(|cores| Cpu { cores });
        if let Some(disk) = domain.devices.disks.first_mut() {
            disk.disk = DiskTarget {
                bus: self.definition.disk_bus.clone(),
            };
        }
        Ok(vm)
    }

    fn user_data(&self, data: &UserData) -> Result<String> {
        render_cloud_config(data)
    }

    fn tests(&self) -> Vec<DynArtifactTest> {
        self.definition
            .checks
            .iter()
            .map(|check| {
                Arc::new(CommandCheck::new(check.clone(), Arc::clone(&self.shells)))
                    as DynArtifactTest
            })
            .collect()
    }
}

#[derive(Serialize)]
struct CloudConfig<'a> {
    users: Vec<CloudUser<'a>>,
}

#[derive(Serialize)]
struct CloudUser<'a> {
    name: &'a str,
    sudo: &'a str,
    shell: &'a str,
    lock_passwd: bool,
    ssh_authorized_keys: &'a [String],
}

/// Renders `data` as a `#cloud-config` document.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn render_cloud_config(data: &UserData) -> Result<String> {
    let config = CloudConfig {
        users: vec![CloudUser {
            name: &data.username,
            sudo: "ALL=(ALL) NOPASSWD:ALL",
            shell: "/bin/bash",
            lock_passwd: true,
            ssh_authorized_keys: &data.authorized_keys,
        }],
    };
    let body = serde_yaml::to_string(&config).map_err(|e| CoreError::user_data(e.to_string()))?;
    Ok(format!("#cloud-config\n{body}"))
}

/// A check that runs a command in the guest and inspects its output.
pub struct CommandCheck {
    definition: CheckDefinition,
    shells: Arc<dyn ShellFactory>,
    retry_budget: Duration,
}

impl CommandCheck {
    /// Creates a check.
    #[must_use]
    pub fn new(definition: CheckDefinition, shells: Arc<dyn ShellFactory>) -> Self {
        Self {
            definition,
            shells,
            retry_budget: DEFAULT_RETRY_BUDGET,
        }
    }

    /// Overrides how long a retrying check keeps trying.
    #[must_use]
    pub fn with_retry_budget(mut self, budget: Duration) -> Self {
        self.retry_budget = budget;
        self
    }

    fn evaluate(&self, output: &crate::guest::ExecOutput) -> Result<()> {
        if output.exit_code != self.definition.expect_exit {
            return Err(CoreError::test_failed(
                &self.definition.name,
                format!(
                    "exit code {} (expected {}): {}",
                    output.exit_code,
                    self.definition.expect_exit,
                    output.stderr.trim()
                ),
            ));
        }
        if let Some(expected) = &self.definition.expect_stdout {
            if !output.stdout.contains(expected.as_str()) {
                return Err(CoreError::test_failed(
                    &self.definition.name,
                    format!("output does not contain '{expected}'"),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactTest for CommandCheck {
    fn name(&self) -> &str {
        &self.definition.name
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        vmi: &VirtualMachineInstance,
        params: &TestParams<'_>,
    ) -> Result<()> {
        let shell = self.shells.open(vmi, params)?;

        if !self.definition.retry_until_ready {
            let output = tokio::select! {
                biased;
                output = shell.exec(&self.definition.command) => output?,
                () = cancel.cancelled() => {
                    return Err(CoreError::guest("cancelled while running check"));
                }
            };
            return self.evaluate(&output);
        }

        let deadline = tokio::time::Instant::now() + self.retry_budget;
        let mut delay = RETRY_INITIAL_DELAY;
        let mut attempt = 1u32;
        loop {
            let exec = tokio::time::timeout_at(deadline, shell.exec(&self.definition.command));
            let outcome = tokio::select! {
                biased;
                result = exec => match result {
                    Ok(Ok(output)) => self.evaluate(&output),
                    Ok(Err(e)) => Err(e),
                    Err(_) => {
                        return Err(CoreError::timeout(format!(
                            "check '{}' still running when its retry budget ran out (attempt {attempt})",
                            self.definition.name
                        )));
                    }
                },
                () = cancel.cancelled() => {
                    return Err(CoreError::guest("cancelled while waiting for guest"));
                }
            };
            let Err(e) = outcome else {
                return Ok(());
            };

            if tokio::time::Instant::now() + delay > deadline {
                return Err(CoreError::timeout(format!(
                    "check '{}' did not pass after {attempt} attempts: {e}",
                    self.definition.name
                )));
            }
            tracing::debug!(check = %self.definition.name, attempt, error = %e, "Check not passing yet, retrying");

            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(CoreError::guest("cancelled while waiting for guest"));
                }
                () = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 3 / 2).min(RETRY_MAX_DELAY);
            attempt += 1;
        }
    }
}
