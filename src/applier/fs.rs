//! Filesystem applier.
//!
//! Staged versions live under `<store_dir>/<name>/<version>-<digest>`; the
//! live version of each package is a symlink at its install path. Cutover
//! replaces that symlink with a single `rename`, so readers see either the
//! old or the new version. The live set is recorded in
//! `<store_dir>/.live.json`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::{Applier, ApplyError, JobState, Package, PackageSource, ProcessSupervisor};

const PREPARED_MARKER: &str = ".prepared";
const BLOB_FILE: &str = "blob";
const STATE_FILE: &str = ".live.json";

/// Directories used by the filesystem applier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplierSettings {
    /// Root of staged package versions and the live-set record.
    pub store_dir: PathBuf,
    /// Default parent of install links.
    pub live_dir: PathBuf,
}

type LiveSet = BTreeMap<String, Package>;

/// Applier that stages packages on disk and exposes them through symlinks.
///
/// Every operation holds the live-set lock for its whole duration, so
/// prepares, cutovers and prunes never interleave.
pub struct FsApplier<S, P> {
    settings: ApplierSettings,
    source: S,
    supervisor: P,
    live: Mutex<LiveSet>,
}

impl<S: PackageSource, P: ProcessSupervisor> FsApplier<S, P> {
    /// Open the store, loading the recorded live set.
    pub async fn open(
        settings: ApplierSettings,
        source: S,
        supervisor: P,
    ) -> Result<Self, ApplyError> {
        tokio::fs::create_dir_all(&settings.store_dir)
            .await
            .map_err(|e| ApplyError::io("creating", &settings.store_dir, e))?;

        let live = load_state(&settings.store_dir.join(STATE_FILE)).await?;
        info!(
            store = %settings.store_dir.display(),
            live = live.len(),
            "Opened package store"
        );

        Ok(Self {
            settings,
            source,
            supervisor,
            live: Mutex::new(live),
        })
    }

    fn staged_dir(&self, pkg: &Package) -> PathBuf {
        let hex = pkg.digest.strongest().hex();
        let short = &hex[..hex.len().min(16)];
        self.settings
            .store_dir
            .join(&pkg.name)
            .join(format!("{}-{short}", pkg.version))
    }

    fn install_path(&self, pkg: &Package) -> PathBuf {
        pkg.install_path
            .clone()
            .unwrap_or_else(|| self.settings.live_dir.join(&pkg.name))
    }

    async fn is_prepared(&self, pkg: &Package) -> bool {
        tokio::fs::try_exists(self.staged_dir(pkg).join(PREPARED_MARKER))
            .await
            .unwrap_or(false)
    }

    async fn persist(&self, live: &LiveSet) -> Result<(), ApplyError> {
        let bytes = serde_json::to_vec_pretty(live).map_err(|e| ApplyError::State(e.to_string()))?;
        write_atomic(&self.settings.store_dir.join(STATE_FILE), &bytes).await
    }

    async fn stop_job(&self, job: &str) -> Result<(), ApplyError> {
        let state = self
            .supervisor
            .status(job)
            .await
            .map_err(|e| supervisor_error(job, &e))?;
        if state == JobState::Running {
            debug!(job, "Stopping job");
            self.supervisor
                .stop(job)
                .await
                .map_err(|e| supervisor_error(job, &e))?;
        }
        Ok(())
    }

    /// Link `pkg` live, record it and start its job.
    async fn switch(&self, pkg: &Package, live: &mut LiveSet) -> Result<(), ApplyError> {
        swap_link(&self.install_path(pkg), &self.staged_dir(pkg)).await?;
        live.insert(pkg.name.clone(), pkg.clone());
        self.persist(live).await?;

        if let Some(job) = &pkg.job {
            self.supervisor
                .start(job)
                .await
                .map_err(|e| supervisor_error(job, &e))?;
        }
        Ok(())
    }

    /// Undo a failed `switch` of `pkg`, putting `previous` back.
    ///
    /// Runs after an error is already being reported, so its own failures are
    /// logged rather than returned.
    async fn restore(&self, previous: Option<&Package>, pkg: &Package, live: &mut LiveSet) {
        let link = self.install_path(pkg);
        let previous_job = previous.and_then(|p| p.job.as_deref());

        if let Some(job) = pkg.job.as_deref().filter(|job| Some(*job) != previous_job) {
            if let Err(e) = self.stop_job(job).await {
                warn!(job, error = %e, "Failed to stop job of abandoned version");
            }
        }

        let relinked = match previous {
            Some(prev) => {
                let prev_link = self.install_path(prev);
                let result = swap_link(&prev_link, &self.staged_dir(prev)).await;
                if result.is_ok() && prev_link != link {
                    if let Err(e) = remove_link(&link).await {
                        warn!(error = %e, "Failed to remove abandoned link");
                    }
                }
                live.insert(prev.name.clone(), prev.clone());
                result
            }
            None => {
                live.remove(&pkg.name);
                remove_link(&link).await
            }
        };
        if let Err(e) = relinked {
            warn!(package = %pkg.name, error = %e, "Failed to restore previous link");
        }
        if let Err(e) = self.persist(live).await {
            warn!(package = %pkg.name, error = %e, "Failed to record restored live set");
        }

        if let Some(job) = previous_job {
            if let Err(e) = self.supervisor.restart(job).await {
                warn!(job, error = %e, "Failed to restart previous job");
            }
        }
    }

    /// Stop, unlink and delete a live package.
    async fn remove(&self, pkg: &Package) -> Result<(), ApplyError> {
        if let Some(job) = &pkg.job {
            self.stop_job(job).await?;
        }
        remove_link(&self.install_path(pkg)).await?;
        remove_dir_if_exists(&self.settings.store_dir.join(&pkg.name)).await
    }

    /// Delete staged versions of `name` other than those in `keep`.
    async fn prune_staged(&self, name: &str, keep: &HashSet<PathBuf>) -> Result<(), ApplyError> {
        let dir = self.settings.store_dir.join(name);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(ApplyError::io("reading", &dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ApplyError::io("reading", &dir, e))?
        {
            let path = entry.path();
            let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            // Hidden entries belong to an unfinished prepare, which cleans them up.
            if !is_dir || hidden || keep.contains(&path) {
                continue;
            }
            remove_dir_if_exists(&path).await?;
            debug!(path = %path.display(), "Removed superseded version");
        }
        Ok(())
    }
}

#[async_trait]
impl<S: PackageSource, P: ProcessSupervisor> Applier for FsApplier<S, P> {
    #[instrument(skip(self, pkg), fields(package = %pkg.name, version = %pkg.version))]
    async fn prepare(&self, pkg: &Package) -> Result<(), ApplyError> {
        pkg.validate()?;
        let _live = self.live.lock().await;

        if self.is_prepared(pkg).await {
            debug!("Already prepared");
            return Ok(());
        }

        let bytes = self
            .source
            .fetch(pkg)
            .await
            .map_err(|e| ApplyError::Source {
                name: pkg.name.clone(),
                message: format!("{e:#}"),
            })?;
        pkg.digest.verify(&bytes).map_err(|source| ApplyError::Digest {
            name: pkg.name.clone(),
            source,
        })?;

        let dir = self.staged_dir(pkg);
        let tmp = sibling(&dir, "tmp");
        // Leftovers of an interrupted prepare; never live without a marker.
        remove_dir_if_exists(&tmp).await?;
        remove_dir_if_exists(&dir).await?;

        tokio::fs::create_dir_all(&tmp)
            .await
            .map_err(|e| ApplyError::io("creating", &tmp, e))?;
        let blob = tmp.join(BLOB_FILE);
        tokio::fs::write(&blob, &bytes)
            .await
            .map_err(|e| ApplyError::io("writing", &blob, e))?;
        let manifest =
            serde_json::to_vec_pretty(pkg).map_err(|e| ApplyError::State(e.to_string()))?;
        let marker = tmp.join(PREPARED_MARKER);
        tokio::fs::write(&marker, manifest)
            .await
            .map_err(|e| ApplyError::io("writing", &marker, e))?;
        tokio::fs::rename(&tmp, &dir)
            .await
            .map_err(|e| ApplyError::io("renaming", &tmp, e))?;

        info!(path = %dir.display(), bytes = bytes.len(), "Prepared package");
        Ok(())
    }

    #[instrument(skip(self, pkg), fields(package = %pkg.name, version = %pkg.version))]
    async fn apply(&self, pkg: &Package) -> Result<(), ApplyError> {
        pkg.validate()?;
        let mut live = self.live.lock().await;

        if !self.is_prepared(pkg).await {
            return Err(ApplyError::NotPrepared {
                name: pkg.name.clone(),
                version: pkg.version.clone(),
            });
        }
        if live.get(&pkg.name) == Some(pkg) {
            debug!("Already live");
            return Ok(());
        }

        let previous = live.get(&pkg.name).cloned();
        if let Some(job) = previous.as_ref().and_then(|p| p.job.as_deref()) {
            self.stop_job(job).await?;
        }

        if let Err(e) = self.switch(pkg, &mut live).await {
            warn!(error = %e, "Cutover failed, restoring previous version");
            self.restore(previous.as_ref(), pkg, &mut live).await;
            return Err(e);
        }

        if let Some(prev) = &previous {
            let old_link = self.install_path(prev);
            if old_link != self.install_path(pkg) {
                if let Err(e) = remove_link(&old_link).await {
                    warn!(error = %e, "Failed to remove superseded link");
                }
            }
        }

        info!(
            previous = previous.as_ref().map(|p| p.version.as_str()),
            "Package is live"
        );
        Ok(())
    }

    #[instrument(skip(self, pkgs), fields(keep = pkgs.len()))]
    async fn keep_only(&self, pkgs: &[Package]) -> Result<(), ApplyError> {
        for pkg in pkgs {
            pkg.validate()?;
        }
        let mut live = self.live.lock().await;

        // Per kept name: the staged versions that survive, i.e. the kept
        // version and the live one.
        let mut keep: HashMap<&str, HashSet<PathBuf>> = HashMap::new();
        for pkg in pkgs {
            keep.entry(pkg.name.as_str())
                .or_default()
                .insert(self.staged_dir(pkg));
        }
        for pkg in live.values() {
            if let Some(dirs) = keep.get_mut(pkg.name.as_str()) {
                dirs.insert(self.staged_dir(pkg));
            }
        }

        let mut failures = Vec::new();
        for (name, dirs) in &keep {
            if let Err(e) = self.prune_staged(name, dirs).await {
                warn!(package = %name, error = %e, "Failed to remove superseded versions");
                failures.push(format!("{name}: {e}"));
            }
        }

        let doomed: Vec<Package> = live
            .values()
            .filter(|p| !keep.contains_key(p.name.as_str()))
            .cloned()
            .collect();
        for pkg in &doomed {
            match self.remove(pkg).await {
                Ok(()) => {
                    live.remove(&pkg.name);
                    info!(package = %pkg.name, version = %pkg.version, "Removed package");
                }
                Err(e) => {
                    warn!(package = %pkg.name, error = %e, "Failed to remove package");
                    failures.push(format!("{}: {e}", pkg.name));
                }
            }
        }
        if !doomed.is_empty() {
            self.persist(&live).await?;
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ApplyError::Prune(failures))
        }
    }

    async fn live(&self) -> Result<Vec<Package>, ApplyError> {
        Ok(self.live.lock().await.values().cloned().collect())
    }
}

fn supervisor_error(job: &str, err: &anyhow::Error) -> ApplyError {
    ApplyError::Supervisor {
        job: job.to_string(),
        message: format!("{err:#}"),
    }
}

/// Hidden sibling of `path` used for write-then-rename.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{suffix}"))
}

async fn load_state(path: &Path) -> Result<LiveSet, ApplyError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| ApplyError::State(format!("parsing {}: {e}", path.display()))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(LiveSet::new()),
        Err(e) => Err(ApplyError::io("reading", path, e)),
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ApplyError> {
    let tmp = sibling(path, "tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| ApplyError::io("writing", &tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| ApplyError::io("renaming", &tmp, e))
}

/// Atomically point the symlink at `link` to `target`.
async fn swap_link(link: &Path, target: &Path) -> Result<(), ApplyError> {
    if let Some(parent) = link.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ApplyError::io("creating", parent, e))?;
    }

    let tmp = sibling(link, "new");
    remove_link(&tmp).await?;
    tokio::fs::symlink(target, &tmp)
        .await
        .map_err(|e| ApplyError::io("linking", &tmp, e))?;
    tokio::fs::rename(&tmp, link)
        .await
        .map_err(|e| ApplyError::io("replacing", link, e))
}

async fn remove_link(path: &Path) -> Result<(), ApplyError> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(ApplyError::io("removing", path, e)),
        _ => Ok(()),
    }
}

async fn remove_dir_if_exists(path: &Path) -> Result<(), ApplyError> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(ApplyError::io("removing", path, e)),
        _ => Ok(()),
    }
}
