//! Manifest storage for a single repository.
//!
//! Manifest content lives in the shared blob store. The repository holds a
//! revision link per manifest digest and a `current` link per tag.

use std::sync::Arc;

use storage::Storage;

use crate::blob::BlobStore;
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult, StorageResultExt};
use crate::link::{self, LayerLinks};
use crate::name::{RepositoryName, Tag};
use crate::paths::{PathManager, PathSpec};
use crate::schema1::SignedManifest;

/// The manifests of one repository.
#[derive(Debug, Clone)]
pub struct Manifests {
    name: RepositoryName,
    storage: Storage,
    paths: Arc<PathManager>,
    blobs: BlobStore,
    links: LayerLinks,
}

impl Manifests {
    pub(crate) fn new(
        name: RepositoryName,
        storage: Storage,
        paths: Arc<PathManager>,
        blobs: BlobStore,
        links: LayerLinks,
    ) -> Self {
        Self {
            name,
            storage,
            paths,
            blobs,
            links,
        }
    }

    fn unknown(&self, reference: impl ToString) -> RegistryError {
        RegistryError::ManifestUnknown {
            name: self.name.clone(),
            reference: reference.to_string(),
        }
    }

    /// Store `manifest` and point `tag` at it.
    ///
    /// Every layer the manifest references must already be linked into this
    /// repository. Nothing is written unless all checks pass.
    #[tracing::instrument(skip(self, manifest), fields(name = %self.name))]
    pub async fn put(&self, tag: &str, manifest: &SignedManifest) -> RegistryResult<Digest> {
        let tag: Tag = tag.parse()?;
        let body = manifest.manifest();

        if body.name != self.name.as_str() {
            return Err(RegistryError::ManifestInvalid(format!(
                "manifest name {:?} does not match repository {}",
                body.name, self.name
            )));
        }
        if body.tag != tag.as_str() {
            return Err(RegistryError::ManifestInvalid(format!(
                "manifest tag {:?} does not match tag {tag}",
                body.tag
            )));
        }

        for layer in body.layers() {
            self.links.stat(layer).await?;
        }

        let descriptor = self.blobs.put_content(manifest.raw()).await?;
        let digest = descriptor.digest;

        let revision = self
            .paths
            .path(PathSpec::ManifestRevisionLink(&self.name, &digest));
        link::write_digest(&self.storage, &revision, &digest).await?;

        let current = self.paths.path(PathSpec::TagCurrentLink(&self.name, &tag));
        link::write_digest(&self.storage, &current, &digest).await?;

        tracing::debug!(%tag, %digest, "Stored manifest");
        Ok(digest)
    }

    /// The digest `tag` currently points at.
    #[tracing::instrument(skip(self), fields(name = %self.name))]
    pub async fn resolve(&self, tag: &str) -> RegistryResult<Digest> {
        let tag: Tag = tag.parse()?;
        let current = self.paths.path(PathSpec::TagCurrentLink(&self.name, &tag));
        link::read_digest(&self.storage, &current)
            .await?
            .ok_or_else(|| self.unknown(&tag))
    }

    /// The manifest `tag` currently points at.
    pub async fn get(&self, tag: &str) -> RegistryResult<SignedManifest> {
        let digest = self.resolve(tag).await?;
        self.get_by_digest(&digest).await.map_err(|err| match err {
            RegistryError::ManifestUnknown { .. } => self.unknown(tag),
            err => err,
        })
    }

    /// The manifest revision `digest`, if this repository holds it.
    #[tracing::instrument(skip(self), fields(name = %self.name, %digest))]
    pub async fn get_by_digest(&self, digest: &Digest) -> RegistryResult<SignedManifest> {
        let revision = self
            .paths
            .path(PathSpec::ManifestRevisionLink(&self.name, digest));
        let target = link::read_digest(&self.storage, &revision)
            .await?
            .ok_or_else(|| self.unknown(digest))?;

        let content = self.blobs.get_content(&target).await.map_err(|err| match err {
            RegistryError::BlobUnknown(_) => self.unknown(digest),
            err => err,
        })?;
        SignedManifest::parse(content)
    }

    /// Whether `tag` resolves to a stored manifest.
    pub async fn exists(&self, tag: &str) -> RegistryResult<bool> {
        let digest = match self.resolve(tag).await {
            Ok(digest) => digest,
            Err(err) if err.is_unknown() => return Ok(false),
            Err(err) => return Err(err),
        };

        let revision = self
            .paths
            .path(PathSpec::ManifestRevisionLink(&self.name, &digest));
        if link::read_digest(&self.storage, &revision).await?.is_none() {
            return Ok(false);
        }
        self.blobs.exists(&digest).await
    }

    /// Every tag in the repository, sorted.
    #[tracing::instrument(skip(self), fields(name = %self.name))]
    pub async fn tags(&self) -> RegistryResult<Vec<String>> {
        let path = self.paths.path(PathSpec::ManifestTags(&self.name));
        let entries = self.storage.list(&path).await.found()?.unwrap_or_default();

        let mut tags: Vec<String> = entries
            .iter()
            .filter_map(|entry| entry.file_name())
            .map(str::to_owned)
            .collect();
        tags.sort();
        Ok(tags)
    }

    /// Manifest deletion is not supported.
    pub async fn delete(&self, reference: &str) -> RegistryResult<()> {
        tracing::debug!(name = %self.name, reference, "Refusing manifest delete");
        Err(RegistryError::Unsupported("manifest deletion"))
    }
}
