//! Configuration management.
//!
//! Settings are layered, later sources winning:
//!
//! 1. Default values
//! 2. System config file (/etc/bootcheck/config.toml)
//! 3. User config file (~/.config/bootcheck/config.toml)
//! 4. A file passed explicitly
//! 5. Environment variables (`BOOTCHECK_*`, nested keys separated by `__`)
//!
//! Command-line flags are applied on top by the caller.
//!
//! ## Example Configuration File
//!
//! ```toml
//! namespace = "kubevirt"
//! registry = "quay.io/containerdisks"
//! timeout_secs = 600
//! workers = 3
//!
//! [kubectl]
//! context = "ci"
//!
//! [ssh]
//! connect_timeout_secs = 5
//! ```

use crate::error::{CoreError, Result};
use crate::guest::SshConfig;
use crate::kubectl::KubectlConfig;
use crate::pool::DEFAULT_WORKERS;
use crate::readiness::DEFAULT_POLL_INTERVAL;
use crate::verify::{DEFAULT_READY_TIMEOUT, VerifyOptions};
use crate::vm_spec::VERIFY_USERNAME;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default namespace for verification VMs.
pub const DEFAULT_NAMESPACE: &str = "kubevirt";

/// Default registry prefix for container disks.
pub const DEFAULT_REGISTRY: &str = "quay.io/containerdisks";

/// Verification run configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Namespace VMs are created in.
    pub namespace: String,
    /// Registry prefix joined with image tags.
    pub registry: String,
    /// Readiness timeout in seconds.
    pub timeout_secs: u64,
    /// Readiness poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Number of concurrent attempts.
    pub workers: usize,
    /// Guest account provisioned for checks.
    pub username: String,
    /// Cluster client settings.
    pub kubectl: KubectlConfig,
    /// Guest shell settings.
    pub ssh: SshConfig,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            registry: DEFAULT_REGISTRY.to_string(),
            timeout_secs: DEFAULT_READY_TIMEOUT.as_secs(),
            poll_interval_ms: u64::try_from(DEFAULT_POLL_INTERVAL.as_millis()).unwrap_or(1000),
            workers: DEFAULT_WORKERS,
            username: VERIFY_USERNAME.to_string(),
            kubectl: KubectlConfig::default(),
            ssh: SshConfig::default(),
        }
    }
}

impl VerifyConfig {
    /// Loads configuration from the standard locations, then `explicit` if
    /// given, then the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `explicit` does not exist, a file cannot be
    /// parsed or the result is invalid.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(system_config_path()))
            .merge(Toml::file(user_config_path()));
        if let Some(path) = explicit {
            figment = figment.merge(Toml::file(require_file(path)?));
        }
        Self::extract(figment.merge(env_provider()))
    }

    /// Loads configuration from a specific file and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or cannot be parsed.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(require_file(path.as_ref())?))
            .merge(env_provider());
        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: Self = figment
            .extract()
            .map_err(|e| CoreError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(CoreError::config("namespace must not be empty"));
        }
        if self.timeout_secs == 0 {
            return Err(CoreError::config("timeout_secs must be positive"));
        }
        if self.poll_interval_ms == 0 {
            return Err(CoreError::config("poll_interval_ms must be positive"));
        }
        if self.workers == 0 {
            return Err(CoreError::config("workers must be at least 1"));
        }
        if self.username.trim().is_empty() {
            return Err(CoreError::config("username must not be empty"));
        }
        Ok(())
    }

    /// Returns the options for a [`Verifier`](crate::verify::Verifier).
    #[must_use]
    pub fn verify_options(&self) -> VerifyOptions {
        VerifyOptions {
            registry: self.registry.clone(),
            ready_timeout: Duration::from_secs(self.timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            username: self.username.clone(),
        }
    }
}

fn env_provider() -> Env {
    Env::prefixed("BOOTCHECK_").split("__")
}

fn require_file(path: &Path) -> Result<&Path> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(CoreError::config(format!(
            "config file {} not found",
            path.display()
        )))
    }
}

fn user_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("bootcheck")
        .join("config.toml")
}

fn system_config_path() -> PathBuf {
    PathBuf::from("/etc/bootcheck/config.toml")
}
