//! Remote execution inside a verification guest.

use crate::artifact::TestParams;
use crate::error::{CoreError, Result};
use crate::vm::VirtualMachineInstance;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::Command;

/// Default SSH port inside guests.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default SSH connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a command run in the guest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code (-1 if the process was killed by a signal).
    pub exit_code: i32,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

/// A channel for running commands in a guest.
#[async_trait]
pub trait GuestShell: Send + Sync {
    /// Runs `command` through the guest's login shell.
    async fn exec(&self, command: &str) -> Result<ExecOutput>;
}

/// Opens guest shells for running instances.
pub trait ShellFactory: Send + Sync {
    /// Opens a shell to `vmi` authenticating with `params`.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance has no reachable address or the
    /// key material cannot be staged.
    fn open(
        &self,
        vmi: &VirtualMachineInstance,
        params: &TestParams<'_>,
    ) -> Result<Box<dyn GuestShell>>;
}

/// SSH client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Path or name of the `ssh` binary.
    pub binary: PathBuf,
    /// Guest SSH port.
    pub port: u16,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ssh"),
            port: DEFAULT_SSH_PORT,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs(),
        }
    }
}

/// Opens [`SshShell`]s using the system `ssh` client.
#[derive(Debug, Clone, Default)]
pub struct SshShellFactory {
    config: SshConfig,
}

impl SshShellFactory {
    /// Creates a factory.
    #[must_use]
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }
}

impl ShellFactory for SshShellFactory {
    fn open(
        &self,
        vmi: &VirtualMachineInstance,
        params: &TestParams<'_>,
    ) -> Result<Box<dyn GuestShell>> {
        Ok(Box::new(SshShell::connect(&self.config, vmi, params)?))
    }
}

/// Shell over the system `ssh` client.
///
/// The private key is staged in a 0600 temporary file for as long as the
/// shell lives and removed when it is dropped. Host keys are not checked,
/// guests are ephemeral.
pub struct SshShell {
    config: SshConfig,
    host: String,
    username: String,
    identity: NamedTempFile,
}

impl SshShell {
    /// Prepares a shell to `vmi`.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance reports no IP address or the
    /// identity file cannot be written.
    pub fn connect(
        config: &SshConfig,
        vmi: &VirtualMachineInstance,
        params: &TestParams<'_>,
    ) -> Result<Self> {
        let host = vmi
            .ip_address()
            .ok_or_else(|| CoreError::guest(format!("VMI {} reports no IP address", vmi.name())))?
            .to_string();

        let mut identity = tempfile::Builder::new()
            .prefix("bootcheck-key-")
            .tempfile()?;
        identity.write_all(params.credentials.to_openssh_private_key().as_bytes())?;
        identity.flush()?;

        Ok(Self {
            config: config.clone(),
            host,
            username: params.username.to_string(),
            identity,
        })
    }

    /// Returns the `ssh` arguments for running `command`.
    fn args(&self, command: &str) -> Vec<String> {
        vec![
            "-i".to_string(),
            self.identity.path().display().to_string(),
            "-o".to_string(),
            "IdentitiesOnly=yes".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout_secs),
            "-p".to_string(),
            self.config.port.to_string(),
            format!("{}@{}", self.username, self.host),
            "--".to_string(),
            command.to_string(),
        ]
    }
}

#[async_trait]
impl GuestShell for SshShell {
    async fn exec(&self, command: &str) -> Result<ExecOutput> {
        tracing::trace!(host = %self.host, command, "ssh exec");

        let output = Command::new(&self.config.binary)
            .args(self.args(command))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                CoreError::guest(format!(
                    "failed to run {}: {e}",
                    self.config.binary.display()
                ))
            })?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
