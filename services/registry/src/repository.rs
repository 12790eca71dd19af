//! A single named repository: its layers and its manifests.

use std::sync::Arc;

use storage::Storage;
use uuid::Uuid;

use crate::blob::{BlobReader, BlobStore, Descriptor};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::link::LayerLinks;
use crate::manifest::Manifests;
use crate::name::RepositoryName;
use crate::paths::{PathManager, PathSpec};
use crate::upload::{BlobWriter, UploadContext, remove_upload};

/// A repository within a [`crate::Registry`].
#[derive(Debug, Clone)]
pub struct Repository {
    name: RepositoryName,
    layers: Layers,
    manifests: Manifests,
}

impl Repository {
    pub(crate) fn new(
        name: RepositoryName,
        storage: Storage,
        paths: Arc<PathManager>,
        blobs: BlobStore,
    ) -> Self {
        let links = LayerLinks::new(name.clone(), storage.clone(), paths.clone(), blobs.clone());
        let manifests = Manifests::new(
            name.clone(),
            storage.clone(),
            paths.clone(),
            blobs.clone(),
            links.clone(),
        );
        let layers = Layers {
            context: UploadContext {
                name: name.clone(),
                storage,
                paths,
                blobs,
                links,
            },
        };

        Self {
            name,
            layers,
            manifests,
        }
    }

    /// The repository name.
    pub fn name(&self) -> &RepositoryName {
        &self.name
    }

    /// Layer access and uploads.
    pub fn layers(&self) -> &Layers {
        &self.layers
    }

    /// Manifest access.
    pub fn manifests(&self) -> &Manifests {
        &self.manifests
    }
}

/// The layers of one repository.
///
/// A layer is visible here only once it has been uploaded to, or mounted
/// into, this repository, even if its blob is already stored for another.
#[derive(Debug, Clone)]
pub struct Layers {
    context: UploadContext,
}

impl Layers {
    fn unknown(&self, digest: &Digest) -> RegistryError {
        RegistryError::LayerUnknown {
            name: self.context.name.clone(),
            digest: digest.clone(),
        }
    }

    /// Whether the layer is linked here and its content is present.
    pub async fn exists(&self, digest: &Digest) -> RegistryResult<bool> {
        self.context.links.exists(digest).await
    }

    /// Describe a linked layer.
    pub async fn stat(&self, digest: &Digest) -> RegistryResult<Descriptor> {
        self.context.links.stat(digest).await
    }

    /// Open a linked layer for reading.
    pub async fn fetch(&self, digest: &Digest) -> RegistryResult<BlobReader> {
        self.fetch_at(digest, 0).await
    }

    /// Open a linked layer for reading from `offset`.
    #[tracing::instrument(skip(self), fields(name = %self.context.name, %digest))]
    pub async fn fetch_at(&self, digest: &Digest, offset: u64) -> RegistryResult<BlobReader> {
        let target = self.context.links.resolve(digest).await?;
        self.context
            .blobs
            .open(digest, &target, offset)
            .await
            .map_err(|err| match err {
                RegistryError::BlobUnknown(_) => self.unknown(digest),
                err => err,
            })
    }

    /// Start a new upload into this repository.
    pub async fn upload(&self) -> RegistryResult<BlobWriter> {
        BlobWriter::start(self.context.clone()).await
    }

    /// Reopen an upload by its identifier.
    pub async fn resume(&self, id: Uuid) -> RegistryResult<BlobWriter> {
        BlobWriter::resume(self.context.clone(), id).await
    }

    /// Remove an upload and its data. Unknown uploads are ignored.
    #[tracing::instrument(skip(self), fields(name = %self.context.name))]
    pub async fn cancel_upload(&self, id: Uuid) -> RegistryResult<()> {
        let path = self
            .context
            .paths
            .path(PathSpec::Upload(&self.context.name, &id));
        remove_upload(&self.context.storage, &path).await;
        Ok(())
    }

    /// Link a blob that is already stored into this repository.
    ///
    /// This is how a layer pushed to one repository becomes available in
    /// another without uploading it again.
    #[tracing::instrument(skip(self), fields(name = %self.context.name, %digest))]
    pub async fn mount(&self, digest: &Digest) -> RegistryResult<Descriptor> {
        let descriptor = self.context.blobs.stat(digest).await?;
        let blob_path = self.context.blobs.path(digest);
        self.context.links.create(digest, &blob_path).await?;
        Ok(descriptor)
    }
}
