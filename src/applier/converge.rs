//! One convergence pass: make the live package set equal a desired set.
//!
//! Every desired package is staged before anything goes live. Packages are
//! then applied in dependency order and, once all of them are live, every
//! other package is pruned. If an apply fails, the packages that were live
//! before the pass are applied again and anything new is pruned.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use super::{Applier, ApplyError, Package};

/// Applier operation that failed during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Prepare,
    Apply,
    KeepOnly,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Prepare => "prepare",
            Self::Apply => "apply",
            Self::KeepOnly => "keep_only",
        })
    }
}

#[derive(Debug, Error)]
pub enum ConvergeError {
    #[error("a convergence pass is already running")]
    PassInProgress,

    #[error("desired package set is invalid: {0}")]
    Invalid(String),

    #[error("reading live packages: {0}")]
    Snapshot(#[source] ApplyError),

    /// `rolled_back` is false when restoring the previous live set also
    /// failed; the node may then hold a mix of old and new versions.
    #[error("{operation} of '{package}' failed{}: {source}", rollback_note(.rolled_back))]
    Failed {
        package: String,
        operation: Operation,
        #[source]
        source: ApplyError,
        rolled_back: bool,
    },

    /// Every desired package is live but some others could not be removed.
    #[error("pruning packages: {0}")]
    Prune(#[source] ApplyError),
}

fn rollback_note(rolled_back: &bool) -> &'static str {
    if *rolled_back {
        ""
    } else {
        " and rollback was incomplete"
    }
}

/// Outcome of a successful pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvergeReport {
    /// Desired package names, in the order they were applied.
    pub applied: Vec<String>,
    /// Previously live package names that were pruned.
    pub removed: Vec<String>,
}

/// Runs convergence passes against an applier, one at a time.
pub struct Reconciler<A> {
    applier: A,
    pass: Mutex<()>,
}

impl<A: Applier> Reconciler<A> {
    pub fn new(applier: A) -> Self {
        Self {
            applier,
            pass: Mutex::new(()),
        }
    }

    pub fn applier(&self) -> &A {
        &self.applier
    }

    /// Converge the live set to exactly `desired`.
    ///
    /// A pass started while another is running fails with
    /// [`ConvergeError::PassInProgress`] instead of queueing.
    #[instrument(skip_all, fields(packages = desired.len()))]
    pub async fn converge(&self, desired: &[Package]) -> Result<ConvergeReport, ConvergeError> {
        let _pass = self
            .pass
            .try_lock()
            .map_err(|_| ConvergeError::PassInProgress)?;

        let order = install_order(desired)?;
        let snapshot = self.applier.live().await.map_err(ConvergeError::Snapshot)?;

        for pkg in &order {
            if let Err(source) = self.applier.prepare(pkg).await {
                // Nothing live has been touched yet.
                return Err(ConvergeError::Failed {
                    package: pkg.name.clone(),
                    operation: Operation::Prepare,
                    source,
                    rolled_back: true,
                });
            }
        }

        let mut applied = Vec::with_capacity(order.len());
        for pkg in &order {
            if let Err(source) = self.applier.apply(pkg).await {
                warn!(package = %pkg.name, error = %source, "Apply failed, rolling back pass");
                let rolled_back = self.roll_back(&snapshot).await;
                return Err(ConvergeError::Failed {
                    package: pkg.name.clone(),
                    operation: Operation::Apply,
                    source,
                    rolled_back,
                });
            }
            applied.push(pkg.name.clone());
        }

        self.applier
            .keep_only(desired)
            .await
            .map_err(ConvergeError::Prune)?;

        let wanted: BTreeSet<&str> = desired.iter().map(|p| p.name.as_str()).collect();
        let removed = snapshot
            .iter()
            .filter(|p| !wanted.contains(p.name.as_str()))
            .map(|p| p.name.clone())
            .collect();

        let report = ConvergeReport { applied, removed };
        info!(
            applied = report.applied.len(),
            removed = report.removed.len(),
            "Converged"
        );
        Ok(report)
    }

    /// Re-apply the pre-pass live set and prune what the pass added.
    async fn roll_back(&self, snapshot: &[Package]) -> bool {
        let order = install_order(snapshot).unwrap_or_else(|_| snapshot.iter().collect());
        let mut clean = true;

        for pkg in order {
            if let Err(e) = self.applier.apply(pkg).await {
                warn!(package = %pkg.name, error = %e, "Failed to restore package");
                clean = false;
            }
        }
        if let Err(e) = self.applier.keep_only(snapshot).await {
            warn!(error = %e, "Failed to prune packages added by the pass");
            clean = false;
        }

        clean
    }
}

/// Order `desired` so every package follows its dependencies.
///
/// Ties keep input order. Fails on duplicate names, dependencies outside the
/// set and cycles.
fn install_order(desired: &[Package]) -> Result<Vec<&Package>, ConvergeError> {
    let mut index = HashMap::with_capacity(desired.len());
    for (i, pkg) in desired.iter().enumerate() {
        pkg.validate()
            .map_err(|e| ConvergeError::Invalid(e.to_string()))?;
        if index.insert(pkg.name.as_str(), i).is_some() {
            return Err(ConvergeError::Invalid(format!(
                "package '{}' is listed more than once",
                pkg.name
            )));
        }
    }

    let mut pending = vec![0usize; desired.len()];
    let mut dependents = vec![Vec::new(); desired.len()];
    for (i, pkg) in desired.iter().enumerate() {
        for dep in &pkg.dependencies {
            let &d = index.get(dep.as_str()).ok_or_else(|| {
                ConvergeError::Invalid(format!(
                    "package '{}' depends on '{dep}', which is not in the set",
                    pkg.name
                ))
            })?;
            pending[i] += 1;
            dependents[d].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..desired.len()).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(desired.len());
    while let Some(i) = ready.pop_first() {
        order.push(&desired[i]);
        for &j in &dependents[i] {
            pending[j] -= 1;
            if pending[j] == 0 {
                ready.insert(j);
            }
        }
    }

    if order.len() < desired.len() {
        let stuck: Vec<&str> = desired
            .iter()
            .zip(&pending)
            .filter(|(_, n)| **n > 0)
            .map(|(p, _)| p.name.as_str())
            .collect();
        return Err(ConvergeError::Invalid(format!(
            "dependency cycle among {}",
            stuck.join(", ")
        )));
    }
    Ok(order)
}
