//! Verification results ledger.
//!
//! The ledger maps artifact identity to the last known verification result.
//! It is read wholesale before a run and written wholesale after it.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Ledger contents keyed by artifact identity.
pub type Ledger = BTreeMap<String, ArtifactResult>;

/// Verification state of one artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactResult {
    /// Image tags published for the artifact.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Whether the images booted and passed their checks.
    #[serde(default)]
    pub verified: bool,
}

impl ArtifactResult {
    /// Creates an unverified result for `tags`.
    #[must_use]
    pub fn pending(tags: Vec<String>) -> Self {
        Self {
            tags,
            verified: false,
        }
    }

    /// Creates a verified result for `tags`.
    #[must_use]
    pub fn verified(tags: Vec<String>) -> Self {
        Self {
            tags,
            verified: true,
        }
    }
}

/// Whole-ledger persistence.
pub trait LedgerStore: Send + Sync {
    /// Reads the full ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger exists but cannot be read.
    fn load(&self) -> Result<Ledger>;

    /// Replaces the full ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be written.
    fn save(&self, ledger: &Ledger) -> Result<()>;
}

/// Ledger stored as a pretty-printed JSON object.
pub struct JsonLedgerFile {
    path: PathBuf,
}

impl JsonLedgerFile {
    /// Creates a store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerStore for JsonLedgerFile {
    fn load(&self) -> Result<Ledger> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No results file yet, starting empty");
                return Ok(Ledger::new());
            }
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(Ledger::new());
        }

        serde_json::from_str(&content).map_err(|e| {
            CoreError::ledger(format!("failed to parse {}: {e}", self.path.display()))
        })
    }

    fn save(&self, ledger: &Ledger) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut content = serde_json::to_vec_pretty(ledger)?;
        content.push(b'\n');

        // Write to a sibling and rename so an interrupted save never leaves
        // a truncated ledger behind.
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| CoreError::ledger(format!("failed to write {}: {e}", self.path.display())))?;

        tracing::debug!(path = %self.path.display(), entries = ledger.len(), "Saved results");
        Ok(())
    }
}
