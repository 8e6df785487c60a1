//! Where package blobs come from.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::Package;

/// Fetches the content of a package blob.
#[async_trait]
pub trait PackageSource: Send + Sync {
    async fn fetch(&self, pkg: &Package) -> Result<Vec<u8>>;
}

/// Local blobstore directory holding blobs named by their digest.
#[derive(Debug, Clone)]
pub struct BlobstoreDir {
    root: PathBuf,
}

impl BlobstoreDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the blob for `pkg`: `<root>/<hex of strongest digest>`.
    pub fn blob_path(&self, pkg: &Package) -> PathBuf {
        self.root.join(pkg.digest.strongest().hex())
    }
}

#[async_trait]
impl PackageSource for BlobstoreDir {
    async fn fetch(&self, pkg: &Package) -> Result<Vec<u8>> {
        let path = self.blob_path(pkg);
        debug!(package = %pkg.name, path = %path.display(), "Reading blob");
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read blob {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Digest;

    #[tokio::test]
    async fn reads_blob_by_digest() {
        let dir = tempfile::tempdir().unwrap();
        let digest = Digest::sha256(b"package bytes");
        std::fs::write(dir.path().join(digest.hex()), b"package bytes").unwrap();

        let pkg = Package {
            name: "redis".to_string(),
            version: "7".to_string(),
            digest: digest.into(),
            dependencies: Default::default(),
            install_path: None,
            job: None,
        };

        let source = BlobstoreDir::new(dir.path());
        assert_eq!(source.fetch(&pkg).await.unwrap(), b"package bytes");
    }

    #[tokio::test]
    async fn missing_blob_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = Package {
            name: "redis".to_string(),
            version: "7".to_string(),
            digest: Digest::sha256(b"absent").into(),
            dependencies: Default::default(),
            install_path: None,
            job: None,
        };

        let err = BlobstoreDir::new(dir.path()).fetch(&pkg).await.unwrap_err();
        assert!(err.to_string().contains("Failed to read blob"));
    }
}
