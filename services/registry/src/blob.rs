//! Content addressed blob storage, shared by every repository.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use storage::{ReadStream, Storage};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult, StorageResultExt};
use crate::paths::{PathManager, PathSpec};

/// What is known about a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    /// Content digest.
    pub digest: Digest,
    /// Size in bytes.
    pub size: u64,
    /// When the content was committed.
    pub created: DateTime<Utc>,
}

/// Global blob store. Blobs reach it only through verified uploads.
#[derive(Debug, Clone)]
pub struct BlobStore {
    storage: Storage,
    paths: Arc<PathManager>,
}

impl BlobStore {
    pub(crate) fn new(storage: Storage, paths: Arc<PathManager>) -> Self {
        Self { storage, paths }
    }

    /// Storage path of the content for `digest`.
    pub(crate) fn path(&self, digest: &Digest) -> Utf8PathBuf {
        self.paths.path(PathSpec::BlobData(digest))
    }

    /// Whether content for `digest` is stored. Absence is not an error.
    #[tracing::instrument(skip(self), fields(%digest))]
    pub async fn exists(&self, digest: &Digest) -> RegistryResult<bool> {
        let metadata = self.storage.stat(&self.path(digest)).await.found()?;
        Ok(metadata.is_some_and(|metadata| !metadata.is_dir))
    }

    /// Describe the blob stored for `digest`.
    #[tracing::instrument(skip(self), fields(%digest))]
    pub async fn stat(&self, digest: &Digest) -> RegistryResult<Descriptor> {
        self.stat_at(digest, &self.path(digest)).await
    }

    /// Describe the blob for `digest` stored at `path`.
    pub(crate) async fn stat_at(
        &self,
        digest: &Digest,
        path: &Utf8Path,
    ) -> RegistryResult<Descriptor> {
        let metadata = self
            .storage
            .stat(path)
            .await
            .or_unknown(|| RegistryError::BlobUnknown(digest.clone()))?;

        if metadata.is_dir {
            return Err(RegistryError::BlobUnknown(digest.clone()));
        }

        Ok(Descriptor {
            digest: digest.clone(),
            size: metadata.size,
            created: metadata.modified,
        })
    }

    /// Open the blob for reading from the start.
    pub async fn fetch(&self, digest: &Digest) -> RegistryResult<BlobReader> {
        self.fetch_at(digest, 0).await
    }

    /// Open the blob for reading from `offset`.
    #[tracing::instrument(skip(self), fields(%digest))]
    pub async fn fetch_at(&self, digest: &Digest, offset: u64) -> RegistryResult<BlobReader> {
        self.open(digest, &self.path(digest), offset).await
    }

    /// Open the blob for `digest` stored at `path`, from `offset`.
    pub(crate) async fn open(
        &self,
        digest: &Digest,
        path: &Utf8Path,
        offset: u64,
    ) -> RegistryResult<BlobReader> {
        let descriptor = self.stat_at(digest, path).await?;
        if offset > descriptor.size {
            return Err(RegistryError::InvalidOffset {
                expected: descriptor.size,
                requested: offset,
            });
        }

        let stream = self
            .storage
            .read_stream(path, offset)
            .await
            .or_unknown(|| RegistryError::BlobUnknown(digest.clone()))?;

        tracing::trace!(size = descriptor.size, offset, "Opened blob");
        Ok(BlobReader {
            descriptor,
            position: offset,
            stream: Some(stream),
        })
    }

    /// Store small content that this store hashes itself, returning its descriptor.
    ///
    /// Used for manifests, whose bytes are already in hand.
    #[tracing::instrument(skip(self, content), fields(size = content.len()))]
    pub(crate) async fn put_content(&self, content: &[u8]) -> RegistryResult<Descriptor> {
        let digest = Digest::sha256(content);
        if !self.exists(&digest).await? {
            self.storage.put_content(&self.path(&digest), content).await?;
        }
        self.stat(&digest).await
    }

    /// Read small content in full.
    pub(crate) async fn get_content(&self, digest: &Digest) -> RegistryResult<Bytes> {
        self.storage
            .get_content(&self.path(digest))
            .await
            .or_unknown(|| RegistryError::BlobUnknown(digest.clone()))
    }
}

/// A readable handle on a stored blob.
///
/// The underlying stream is released by [`BlobReader::close`] or on drop.
/// Closing more than once is harmless; reading after close fails with
/// [`RegistryError::LayerClosed`].
pub struct BlobReader {
    descriptor: Descriptor,
    position: u64,
    stream: Option<ReadStream>,
}

impl std::fmt::Debug for BlobReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobReader")
            .field("descriptor", &self.descriptor)
            .field("position", &self.position)
            .field("closed", &self.stream.is_none())
            .finish()
    }
}

impl BlobReader {
    /// The blob being read.
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Content digest.
    pub fn digest(&self) -> &Digest {
        &self.descriptor.digest
    }

    /// Total size of the blob in bytes.
    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    /// When the blob was committed.
    pub fn created(&self) -> DateTime<Utc> {
        self.descriptor.created
    }

    /// Offset of the next byte to be read.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Whether [`BlobReader::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Release the underlying stream.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::trace!(digest = %self.descriptor.digest, "Closed blob");
        }
    }

    /// Read everything from the current position to the end.
    pub async fn read_to_end(&mut self) -> RegistryResult<Bytes> {
        if self.is_closed() {
            return Err(RegistryError::LayerClosed);
        }

        let mut buf = Vec::with_capacity((self.size() - self.position) as usize);
        AsyncReadExt::read_to_end(self, &mut buf).await?;
        Ok(buf.into())
    }
}

impl AsyncRead for BlobReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let Some(stream) = this.stream.as_mut() else {
            return Poll::Ready(Err(io::Error::other(RegistryError::LayerClosed)));
        };

        let before = buf.filled().len();
        let polled = Pin::new(stream).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = polled {
            this.position += (buf.filled().len() - before) as u64;
        }
        polled
    }
}
