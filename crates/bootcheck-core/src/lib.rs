//! # bootcheck-core
//!
//! Boot verification of published VM disk images on KubeVirt.
//!
//! For every catalog artifact whose images are published but not yet
//! verified, a throwaway VM is created from the first image tag with fresh
//! SSH credentials, polled until ready, checked from inside the guest and
//! deleted again. Results are merged into a JSON ledger.
//!
//! - [`Orchestrator`]: one run over the catalog
//! - [`Verifier`]: one attempt for one artifact
//! - [`WorkerPool`]: bounded concurrency
//! - [`ClusterClient`]: VM operations, implemented by [`KubectlClient`]
//!
//! ## Architecture
//!
//! ```text
//!   catalog.toml         results.json
//!        │                    │  ▲
//!        ▼                    ▼  │
//! ┌──────────────────────────────────────┐
//! │             Orchestrator             │
//! │   select ─► WorkerPool ─► merge/save │
//! └──────────────────┬───────────────────┘
//!                    ▼
//!        ┌──────────────────────┐
//!        │       Verifier       │
//!        │ plan ► create ► wait │
//!        │ ► tests ► delete     │
//!        └───┬──────────────┬───┘
//!            ▼              ▼
//!      ClusterClient    GuestShell
//!       (kubectl)         (ssh)
//! ```

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod aggregate;
pub mod artifact;
pub mod catalog;
pub mod cluster;
pub mod config;
pub mod credentials;
pub mod error;
pub mod guest;
pub mod kubectl;
pub mod ledger;
pub mod orchestrator;
pub mod pool;
pub mod readiness;
pub mod verify;
pub mod vm;
pub mod vm_spec;

pub use aggregate::{ResultCollector, ResultSender, WorkerResult};
pub use artifact::{
    Artifact, ArtifactMetadata, ArtifactTest, DynArtifact, DynArtifactTest, TestParams, UserData,
};
pub use catalog::{CatalogFile, CommandCheck, DeclaredArtifact};
pub use cluster::{ClusterClient, DynClusterClient};
pub use config::VerifyConfig;
pub use credentials::Credentials;
pub use error::{CoreError, Result};
pub use guest::{ExecOutput, GuestShell, ShellFactory, SshConfig, SshShellFactory};
pub use kubectl::{KubectlClient, KubectlConfig};
pub use ledger::{ArtifactResult, JsonLedgerFile, Ledger, LedgerStore};
pub use orchestrator::{Candidate, Orchestrator, RunSummary, select_candidates};
pub use pool::{PoolReport, WorkItem, WorkerPool};
pub use readiness::{Readiness, wait_vm_ready};
pub use verify::{Verifier, VerifyOptions, VmLease};
pub use vm::{VirtualMachine, VirtualMachineInstance};
