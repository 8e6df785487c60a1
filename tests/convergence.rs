//! Convergence passes against the filesystem applier and a blobstore
//! directory.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use agent_tasks::applier::{
    Applier, ApplierSettings, BlobstoreDir, ConvergeError, FsApplier, MonitSupervisor, Operation,
    Package, Reconciler,
};
use agent_tasks::digest::Digest;
use tempfile::TempDir;

struct Node {
    _root: TempDir,
    blobs: PathBuf,
    store_dir: PathBuf,
    live_dir: PathBuf,
    reconciler: Reconciler<FsApplier<BlobstoreDir, MonitSupervisor>>,
}

impl Node {
    /// A node whose supervisor binary is `supervisor`.
    async fn new(supervisor: &str) -> Self {
        let root = tempfile::tempdir().unwrap();
        let blobs = root.path().join("blobs");
        let store_dir = root.path().join("data/packages");
        let live_dir = root.path().join("packages");
        std::fs::create_dir_all(&blobs).unwrap();

        let applier = FsApplier::open(
            ApplierSettings {
                store_dir: store_dir.clone(),
                live_dir: live_dir.clone(),
            },
            BlobstoreDir::new(&blobs),
            MonitSupervisor::new(supervisor),
        )
        .await
        .unwrap();

        Self {
            _root: root,
            blobs,
            store_dir,
            live_dir,
            reconciler: Reconciler::new(applier),
        }
    }

    /// Publish a blob and describe the package built from it.
    fn publish(&self, name: &str, version: &str, deps: &[&str]) -> Package {
        let content = format!("{name} {version}");
        let digest = Digest::sha256(content.as_bytes());
        std::fs::write(self.blobs.join(digest.hex()), &content).unwrap();
        Package {
            name: name.to_string(),
            version: version.to_string(),
            digest: digest.into(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            install_path: None,
            job: None,
        }
    }

    async fn live_names(&self) -> BTreeSet<String> {
        self.reconciler
            .applier()
            .live()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect()
    }

    /// Staged version directories kept for `name`.
    fn staged_versions(&self, name: &str) -> usize {
        std::fs::read_dir(self.store_dir.join(name))
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
                    .count()
            })
            .unwrap_or(0)
    }

    fn linked_content(&self, name: &str) -> Option<String> {
        std::fs::read_to_string(self.live_dir.join(name).join("blob")).ok()
    }
}

fn names(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

#[tokio::test]
async fn converges_to_desired_set() {
    let node = Node::new("true").await;
    let c = node.publish("c", "1", &[]);
    node.reconciler.converge(&[c]).await.unwrap();
    assert_eq!(node.live_names().await, names(&["c"]));

    let a = node.publish("a", "1", &[]);
    let b = node.publish("b", "1", &["a"]);
    let report = node.reconciler.converge(&[b, a]).await.unwrap();

    assert_eq!(report.applied, vec!["a", "b"]);
    assert_eq!(report.removed, vec!["c"]);
    assert_eq!(node.live_names().await, names(&["a", "b"]));
    assert_eq!(node.linked_content("a").as_deref(), Some("a 1"));
    assert_eq!(node.linked_content("b").as_deref(), Some("b 1"));
    assert!(!exists(&node.live_dir.join("c")));
}

#[tokio::test]
async fn upgrade_replaces_live_version() {
    let node = Node::new("true").await;
    let v1 = node.publish("ruby", "3.2", &[]);
    node.reconciler.converge(&[v1]).await.unwrap();

    let v2 = node.publish("ruby", "3.3", &[]);
    node.reconciler.converge(&[v2]).await.unwrap();

    assert_eq!(node.linked_content("ruby").as_deref(), Some("ruby 3.3"));
}

#[tokio::test]
async fn repeated_upgrades_keep_one_staged_version() {
    let node = Node::new("true").await;
    for version in ["1", "2", "3", "4"] {
        let pkg = node.publish("ruby", version, &[]);
        node.reconciler.converge(&[pkg]).await.unwrap();
    }

    assert_eq!(node.staged_versions("ruby"), 1);
    assert_eq!(node.linked_content("ruby").as_deref(), Some("ruby 4"));
}

#[tokio::test]
async fn missing_blob_leaves_node_untouched() {
    let node = Node::new("true").await;
    let c = node.publish("c", "1", &[]);
    node.reconciler.converge(&[c]).await.unwrap();

    let a = node.publish("a", "1", &[]);
    let mut b = node.publish("b", "1", &[]);
    b.digest = Digest::sha256(b"never published").into();

    let err = node.reconciler.converge(&[a, b]).await.unwrap_err();

    assert!(matches!(
        err,
        ConvergeError::Failed { ref package, operation: Operation::Prepare, .. } if package == "b"
    ));
    assert_eq!(node.live_names().await, names(&["c"]));
    assert!(!exists(&node.live_dir.join("a")));
}

#[tokio::test]
async fn failed_job_rolls_back_pass() {
    // Every supervisor command fails, so any package with a job cannot start.
    let node = Node::new("false").await;
    let c = node.publish("c", "1", &[]);
    node.reconciler.converge(&[c.clone()]).await.unwrap();

    let a = node.publish("a", "1", &[]);
    let mut b = node.publish("b", "1", &["a"]);
    b.job = Some("b-server".to_string());

    let err = node.reconciler.converge(&[a, b, c]).await.unwrap_err();

    assert!(matches!(
        err,
        ConvergeError::Failed { ref package, operation: Operation::Apply, rolled_back: true, .. }
            if package == "b"
    ));
    assert_eq!(node.live_names().await, names(&["c"]));
    assert!(!exists(&node.live_dir.join("a")));
    assert!(!exists(&node.live_dir.join("b")));
    assert_eq!(node.linked_content("c").as_deref(), Some("c 1"));
}
