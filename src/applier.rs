//! Package applier trait and implementations.
//!
//! An applier converges the node's live package set in two phases: packages
//! are first staged with `prepare`, then cut over with `apply`. `keep_only`
//! prunes whatever the desired set no longer names.

mod converge;
mod fs;
mod source;
mod supervisor;

pub use converge::{ConvergeError, ConvergeReport, Operation, Reconciler};
pub use fs::{ApplierSettings, FsApplier};
pub use source::{BlobstoreDir, PackageSource};
pub use supervisor::{JobState, MonitSupervisor, ProcessSupervisor};

use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::digest::{DigestError, MultipleDigest};

/// One installable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub version: String,
    /// Digest of the package blob.
    pub digest: MultipleDigest,
    /// Names of packages that must be live before this one.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Where the live version is exposed. Defaults to `<live_dir>/<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_path: Option<PathBuf>,
    /// Supervised job restarted around cutover.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,
}

impl Package {
    /// Reject names and versions that cannot be used as path components.
    pub fn validate(&self) -> Result<(), ApplyError> {
        for (field, value) in [("name", &self.name), ("version", &self.version)] {
            if value.is_empty() || value.starts_with('.') || value.contains(['/', '\\', '\0']) {
                return Err(ApplyError::InvalidPackage {
                    name: self.name.clone(),
                    reason: format!("{field} '{value}' is not a valid path component"),
                });
            }
        }
        Ok(())
    }
}

/// Errors from applier operations.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("package '{name}' is invalid: {reason}")]
    InvalidPackage { name: String, reason: String },

    /// `apply` was called on a package that was never staged.
    #[error("package {name}/{version} was not prepared")]
    NotPrepared { name: String, version: String },

    #[error("fetching package '{name}': {message}")]
    Source { name: String, message: String },

    #[error("verifying package '{name}': {source}")]
    Digest {
        name: String,
        #[source]
        source: DigestError,
    },

    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("job '{job}': {message}")]
    Supervisor { job: String, message: String },

    #[error("live package state: {0}")]
    State(String),

    /// `keep_only` could not remove some packages; the rest were removed.
    #[error("failed to remove {}", .0.join("; "))]
    Prune(Vec<String>),
}

impl ApplyError {
    pub(crate) fn io(
        action: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

/// Two-phase package convergence.
#[async_trait]
pub trait Applier: Send + Sync {
    /// Stage `pkg` without touching anything live. Idempotent.
    async fn prepare(&self, pkg: &Package) -> Result<(), ApplyError>;

    /// Make a prepared `pkg` the live version of its name, all or nothing.
    async fn apply(&self, pkg: &Package) -> Result<(), ApplyError>;

    /// Remove every live package whose name is not in `pkgs`.
    async fn keep_only(&self, pkgs: &[Package]) -> Result<(), ApplyError>;

    /// The currently live packages.
    async fn live(&self) -> Result<Vec<Package>, ApplyError>;
}
