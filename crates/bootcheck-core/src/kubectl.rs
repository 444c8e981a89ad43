//! Cluster client backed by the `kubectl` command-line tool.

use crate::cluster::ClusterClient;
use crate::error::{CoreError, Result};
use crate::vm::{VirtualMachine, VirtualMachineInstance};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// `kubectl` settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubectlConfig {
    /// Path or name of the `kubectl` binary.
    pub binary: PathBuf,
    /// Kubeconfig file; kubectl's own resolution applies when unset.
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context; the current context when unset.
    pub context: Option<String>,
}

impl Default for KubectlConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("kubectl"),
            kubeconfig: None,
            context: None,
        }
    }
}

/// KubeVirt client that shells out to `kubectl`.
#[derive(Debug, Clone)]
pub struct KubectlClient {
    config: KubectlConfig,
    namespace: String,
}

impl KubectlClient {
    /// Creates a client for `namespace`.
    pub fn new(config: KubectlConfig, namespace: impl Into<String>) -> Self {
        Self {
            config,
            namespace: namespace.into(),
        }
    }

    /// Arguments shared by every invocation.
    fn base_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(kubeconfig) = &self.config.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(kubeconfig.display().to_string());
        }
        if let Some(context) = &self.config.context {
            args.push("--context".to_string());
            args.push(context.clone());
        }
        args.push("--namespace".to_string());
        args.push(self.namespace.clone());
        args
    }

    fn create_args(&self) -> Vec<String> {
        let mut args = self.base_args();
        args.extend(["create", "-f", "-", "-o", "json"].map(String::from));
        args
    }

    fn get_args(&self, kind: &str, name: &str) -> Vec<String> {
        let mut args = self.base_args();
        args.extend(["get", kind, name, "-o", "json"].map(String::from));
        args
    }

    fn delete_args(&self, name: &str, grace_period: Duration) -> Vec<String> {
        let mut args = self.base_args();
        args.extend(["delete", "virtualmachine", name, "--wait=false"].map(String::from));
        args.push(format!("--grace-period={}", grace_period.as_secs()));
        if grace_period.is_zero() {
            args.push("--force".to_string());
        }
        args
    }

    async fn run(&self, args: Vec<String>, stdin: Option<Vec<u8>>, what: &str) -> Result<Vec<u8>> {
        tracing::trace!(?args, "kubectl");

        let mut child = Command::new(&self.config.binary)
            .args(&args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CoreError::cluster(format!(
                    "failed to run {}: {e}",
                    self.config.binary.display()
                ))
            })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(&input).await?;
            pipe.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if output.status.success() {
            return Ok(output.stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(classify_failure(what, stderr.trim()))
    }

    async fn get<T: DeserializeOwned>(&self, kind: &str, name: &str) -> Result<T> {
        let what = format!("{kind}/{name}");
        let stdout = self.run(self.get_args(kind, name), None, &what).await?;
        parse_object(&what, &stdout)
    }
}

/// Maps a failed invocation's stderr to an error.
fn classify_failure(what: &str, stderr: &str) -> CoreError {
    if stderr.contains("NotFound") || stderr.contains("not found") {
        CoreError::not_found(what)
    } else {
        CoreError::cluster(format!("kubectl failed for {what}: {stderr}"))
    }
}

fn parse_object<T: DeserializeOwned>(what: &str, stdout: &[u8]) -> Result<T> {
    serde_json::from_slice(stdout)
        .map_err(|e| CoreError::cluster(format!("unexpected kubectl output for {what}: {e}")))
}

#[async_trait]
impl ClusterClient for KubectlClient {
    async fn create_vm(&self, vm: &VirtualMachine) -> Result<VirtualMachine> {
        let mut vm = vm.clone();
        vm.metadata.namespace = Some(self.namespace.clone());
        let body = serde_json::to_vec(&vm)?;

        let what = format!("virtualmachine/{}", vm.name());
        // Past this point kubectl may have submitted the object; only a
        // classified kubectl failure means it was rejected.
        let stdout = match self.run(self.create_args(), Some(body), &what).await {
            Ok(stdout) => stdout,
            Err(e @ CoreError::Io(_)) => return Err(CoreError::unconfirmed(vm.name(), e.to_string())),
            Err(e) => return Err(e),
        };
        parse_object(&what, &stdout).map_err(|e| CoreError::unconfirmed(vm.name(), e.to_string()))
    }

    async fn get_vm(&self, name: &str) -> Result<VirtualMachine> {
        self.get("virtualmachine", name).await
    }

    async fn delete_vm(&self, name: &str, grace_period: Duration) -> Result<()> {
        let what = format!("virtualmachine/{name}");
        self.run(self.delete_args(name, grace_period), None, &what)
            .await
            .map(|_| ())
    }

    async fn get_vmi(&self, name: &str) -> Result<VirtualMachineInstance> {
        self.get("virtualmachineinstance", name).await
    }
}
