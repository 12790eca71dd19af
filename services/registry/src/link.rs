//! Links: small files that point from a repository namespace at shared content.
//!
//! Layer links hold the storage path of a committed blob. Revision and tag
//! links hold a digest string. A link is only written once its target is
//! durable, so a present link always resolves.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use storage::{Storage, StorageError, StorageErrorKind};

use crate::blob::{BlobStore, Descriptor};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult, StorageResultExt};
use crate::name::RepositoryName;
use crate::paths::{PathManager, PathSpec};

fn corrupt<E>(path: &Utf8Path, error: E) -> RegistryError
where
    E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
{
    StorageError::builder("link", StorageErrorKind::Other, error)
        .path(path.as_str())
        .context("corrupt link")
        .build()
        .into()
}

/// Read a link holding a digest. `None` if there is no link.
pub(crate) async fn read_digest(
    storage: &Storage,
    path: &Utf8Path,
) -> RegistryResult<Option<Digest>> {
    let Some(content) = storage.get_content(path).await.found()? else {
        return Ok(None);
    };

    let text = std::str::from_utf8(&content).map_err(|err| corrupt(path, err))?;
    let digest = text.trim().parse().map_err(|err| corrupt(path, err))?;
    Ok(Some(digest))
}

/// Point the link at `path` to `digest`, replacing any previous target.
pub(crate) async fn write_digest(
    storage: &Storage,
    path: &Utf8Path,
    digest: &Digest,
) -> RegistryResult<()> {
    storage.put_content(path, digest.to_string().as_bytes()).await?;
    Ok(())
}

/// The layer links of a single repository.
#[derive(Debug, Clone)]
pub(crate) struct LayerLinks {
    name: RepositoryName,
    storage: Storage,
    paths: Arc<PathManager>,
    blobs: BlobStore,
}

impl LayerLinks {
    pub(crate) fn new(
        name: RepositoryName,
        storage: Storage,
        paths: Arc<PathManager>,
        blobs: BlobStore,
    ) -> Self {
        Self {
            name,
            storage,
            paths,
            blobs,
        }
    }

    fn path(&self, digest: &Digest) -> Utf8PathBuf {
        self.paths.path(PathSpec::LayerLink(&self.name, digest))
    }

    fn unknown(&self, digest: &Digest) -> RegistryError {
        RegistryError::LayerUnknown {
            name: self.name.clone(),
            digest: digest.clone(),
        }
    }

    /// Make the blob at `blob_path` visible in this repository as `digest`.
    ///
    /// The blob must already be committed.
    #[tracing::instrument(skip(self), fields(name = %self.name, %digest))]
    pub(crate) async fn create(&self, digest: &Digest, blob_path: &Utf8Path) -> RegistryResult<()> {
        self.storage
            .put_content(&self.path(digest), blob_path.as_str().as_bytes())
            .await?;
        tracing::debug!("Linked layer");
        Ok(())
    }

    /// The blob path `digest` is linked to.
    #[tracing::instrument(skip(self), fields(name = %self.name, %digest))]
    pub(crate) async fn resolve(&self, digest: &Digest) -> RegistryResult<Utf8PathBuf> {
        let path = self.path(digest);
        let content = self
            .storage
            .get_content(&path)
            .await
            .or_unknown(|| self.unknown(digest))?;

        let target = std::str::from_utf8(&content).map_err(|err| corrupt(&path, err))?;
        if target.is_empty() {
            return Err(corrupt(&path, "link is empty"));
        }
        Ok(Utf8PathBuf::from(target))
    }

    /// Resolve `digest` and describe the blob behind it.
    pub(crate) async fn stat(&self, digest: &Digest) -> RegistryResult<Descriptor> {
        let target = self.resolve(digest).await?;
        self.blobs.stat_at(digest, &target).await.map_err(|err| match err {
            RegistryError::BlobUnknown(_) => self.unknown(digest),
            err => err,
        })
    }

    /// Whether `digest` is linked here and its blob is present.
    pub(crate) async fn exists(&self, digest: &Digest) -> RegistryResult<bool> {
        match self.stat(digest).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_unknown() => Ok(false),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::MemoryDriver;

    fn links(storage: &Storage, name: &str) -> LayerLinks {
        let paths = Arc::new(PathManager::default());
        let blobs = BlobStore::new(storage.clone(), paths.clone());
        LayerLinks::new(name.parse().unwrap(), storage.clone(), paths, blobs)
    }

    #[tokio::test]
    async fn resolve_missing_link() {
        let storage = Storage::new(MemoryDriver::new());
        let links = links(&storage, "library/ubuntu");
        let digest = Digest::sha256(b"layer");

        let err = links.resolve(&digest).await.unwrap_err();
        assert!(matches!(err, RegistryError::LayerUnknown { .. }));
        assert!(!links.exists(&digest).await.unwrap());
    }

    #[tokio::test]
    async fn links_are_per_repository() {
        let storage = Storage::new(MemoryDriver::new());
        let ubuntu = links(&storage, "library/ubuntu");
        let debian = links(&storage, "library/debian");

        let descriptor = ubuntu.blobs.put_content(b"layer").await.unwrap();
        let blob_path = ubuntu.blobs.path(&descriptor.digest);
        ubuntu.create(&descriptor.digest, &blob_path).await.unwrap();

        assert_eq!(ubuntu.resolve(&descriptor.digest).await.unwrap(), blob_path);
        assert!(ubuntu.exists(&descriptor.digest).await.unwrap());
        assert!(!debian.exists(&descriptor.digest).await.unwrap());
    }

    #[tokio::test]
    async fn stat_follows_link_target() {
        let storage = Storage::new(MemoryDriver::new());
        let links = links(&storage, "library/ubuntu");
        let digest = Digest::sha256(b"layer");
        let target = Utf8Path::new("/relocated/data");

        storage.put_content(target, b"relocated layer").await.unwrap();
        links.create(&digest, target).await.unwrap();

        let descriptor = links.stat(&digest).await.unwrap();
        assert_eq!(descriptor.digest, digest);
        assert_eq!(descriptor.size, 15);

        storage.delete(target).await.unwrap();
        let err = links.stat(&digest).await.unwrap_err();
        assert!(matches!(err, RegistryError::LayerUnknown { .. }));
    }

    #[tokio::test]
    async fn digest_links() {
        let storage = Storage::new(MemoryDriver::new());
        let path = Utf8Path::new("/tags/latest/current/link");
        assert_eq!(read_digest(&storage, path).await.unwrap(), None);

        let digest = Digest::sha256(b"manifest");
        write_digest(&storage, path, &digest).await.unwrap();
        assert_eq!(read_digest(&storage, path).await.unwrap(), Some(digest));

        storage.put_content(path, b"garbage").await.unwrap();
        assert!(matches!(
            read_digest(&storage, path).await,
            Err(RegistryError::Storage(_))
        ));
    }
}
