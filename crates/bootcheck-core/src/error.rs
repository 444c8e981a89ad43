//! Error types for the verification core.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while verifying images.
///
/// There is no cancellation variant; a cancelled attempt returns
/// `Ok(None)`.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Keypair generation failed.
    #[error("credential error: {0}")]
    Credentials(String),

    /// Guest-init data could not be rendered.
    #[error("user data error: {0}")]
    UserData(String),

    /// VM definition could not be built.
    #[error("VM definition error: {0}")]
    VmSpec(String),

    /// Cluster API call failed.
    #[error("cluster error: {0}")]
    Cluster(String),

    /// A VM was submitted but the cluster's answer could not be read, so it
    /// may exist.
    #[error("VM {name} submitted but not confirmed: {reason}")]
    Unconfirmed {
        /// Name of the submitted VM.
        name: String,
        /// What went wrong after submission.
        reason: String,
    },

    /// Cluster resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An operation exceeded its time budget.
    #[error("timeout: {0}")]
    Timeout(String),

    /// An in-guest check failed.
    #[error("test '{name}' failed: {reason}")]
    TestFailed {
        /// Name of the failing check.
        name: String,
        /// Why it failed.
        reason: String,
    },

    /// Remote execution channel error.
    #[error("guest error: {0}")]
    Guest(String),

    /// A worker stopped before finishing a job.
    #[error("worker error: {0}")]
    Worker(String),

    /// Results ledger could not be read or written.
    #[error("ledger error: {0}")]
    Ledger(String),

    /// Catalog file is invalid.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// One or more verification attempts failed.
    #[error("{failed} of {total} verification attempt(s) failed")]
    VerificationFailed {
        /// Number of attempts that returned an error.
        failed: usize,
        /// Number of attempts dispatched.
        total: usize,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Creates a new credential error.
    #[must_use]
    pub fn credentials(msg: impl Into<String>) -> Self {
        Self::Credentials(msg.into())
    }

    /// Creates a new user data error.
    #[must_use]
    pub fn user_data(msg: impl Into<String>) -> Self {
        Self::UserData(msg.into())
    }

    /// Creates a new VM definition error.
    #[must_use]
    pub fn vm_spec(msg: impl Into<String>) -> Self {
        Self::VmSpec(msg.into())
    }

    /// Creates a new cluster error.
    #[must_use]
    pub fn cluster(msg: impl Into<String>) -> Self {
        Self::Cluster(msg.into())
    }

    /// Creates a new unconfirmed-creation error.
    #[must_use]
    pub fn unconfirmed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unconfirmed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new not found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Creates a new timeout error.
    #[must_use]
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Creates a new test failure.
    #[must_use]
    pub fn test_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TestFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new guest error.
    #[must_use]
    pub fn guest(msg: impl Into<String>) -> Self {
        Self::Guest(msg.into())
    }

    /// Creates a new worker error.
    #[must_use]
    pub fn worker(msg: impl Into<String>) -> Self {
        Self::Worker(msg.into())
    }

    /// Creates a new ledger error.
    #[must_use]
    pub fn ledger(msg: impl Into<String>) -> Self {
        Self::Ledger(msg.into())
    }

    /// Creates a new catalog error.
    #[must_use]
    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns true if this is a timeout error.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Returns the name of a VM that may exist despite this error.
    #[must_use]
    pub fn submitted_vm(&self) -> Option<&str> {
        match self {
            Self::Unconfirmed { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Returns true if this is a not found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if this error came from an in-guest check.
    #[must_use]
    pub const fn is_test_failure(&self) -> bool {
        matches!(self, Self::TestFailed { .. })
    }
}
