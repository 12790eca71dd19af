//! Resumable blob uploads.
//!
//! An upload lives under `_uploads/<uuid>` in its repository until it is
//! finished or cancelled. Everything needed to resume it is on storage, so
//! a [`BlobWriter`] may be dropped and recreated with [`BlobWriter::resume`]
//! at any point.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use storage::{Storage, StorageError, StorageErrorKind};
use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, BufReader, ReadBuf};
use uuid::Uuid;

use crate::blob::{BlobStore, Descriptor};
use crate::digest::{Algorithm, Digest, Digester};
use crate::error::{RegistryError, RegistryResult, StorageResultExt};
use crate::link::LayerLinks;
use crate::name::RepositoryName;
use crate::paths::{PathManager, PathSpec};

const CATCH_UP_CHUNK: usize = 64 * 1024;

/// Where an upload is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Accepting writes.
    Writing,
    /// Committed to the blob store.
    Finished,
    /// Abandoned, with its data removed.
    Cancelled,
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadState::Writing => f.write_str("writing"),
            UploadState::Finished => f.write_str("finished"),
            UploadState::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Hashes bytes as they are read out of the inner reader.
struct HashingReader<'r, R> {
    inner: &'r mut R,
    digester: Digester,
    read: u64,
}

impl<'r, R> HashingReader<'r, R> {
    fn new(inner: &'r mut R, digester: Digester) -> Self {
        Self {
            inner,
            digester,
            read: 0,
        }
    }

    fn into_parts(self) -> (Digester, u64) {
        (self.digester, self.read)
    }
}

impl<R> AsyncRead for HashingReader<'_, R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let before = buf.filled().len();
        ready!(Pin::new(&mut *this.inner).poll_read(cx, buf))?;

        let fresh = &buf.filled()[before..];
        this.digester.update(fresh);
        this.read += fresh.len() as u64;
        Poll::Ready(Ok(()))
    }
}

/// Remove an upload directory. Absence is success; other failures are logged.
pub(crate) async fn remove_upload(storage: &Storage, path: &Utf8Path) {
    match storage.delete(path).await {
        Ok(()) => tracing::debug!(%path, "Removed upload"),
        Err(err) if err.is_not_found() => tracing::trace!(%path, "Upload already removed"),
        Err(err) => tracing::warn!(%path, "Failed to remove upload: {err}"),
    }
}

/// Shared handles a writer needs.
#[derive(Debug, Clone)]
pub(crate) struct UploadContext {
    pub(crate) name: RepositoryName,
    pub(crate) storage: Storage,
    pub(crate) paths: Arc<PathManager>,
    pub(crate) blobs: BlobStore,
    pub(crate) links: LayerLinks,
}

/// An in-progress blob upload.
///
/// Bytes must be written strictly in order: each write starts at the current
/// durable size. The running digest only covers bytes the driver confirmed,
/// so a failed write leaves it where it was and the next operation catches it
/// up from what actually reached storage.
pub struct BlobWriter {
    id: Uuid,
    started: DateTime<Utc>,
    context: UploadContext,
    digester: Digester,
    hashed: u64,
    state: UploadState,
}

impl fmt::Debug for BlobWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobWriter")
            .field("id", &self.id)
            .field("name", &self.context.name)
            .field("started", &self.started)
            .field("hashed", &self.hashed)
            .field("state", &self.state)
            .finish()
    }
}

impl BlobWriter {
    /// Begin a new upload.
    #[tracing::instrument(skip(context), fields(name = %context.name))]
    pub(crate) async fn start(context: UploadContext) -> RegistryResult<Self> {
        let id = Uuid::new_v4();
        let started = Utc::now();

        let startedat = context
            .paths
            .path(PathSpec::UploadStartedAt(&context.name, &id));
        context
            .storage
            .put_content(&startedat, started.to_rfc3339().as_bytes())
            .await?;

        let data = context.paths.path(PathSpec::UploadData(&context.name, &id));
        context.storage.put_content(&data, b"").await?;

        tracing::debug!(%id, "Started upload");
        Ok(Self::open(id, started, context))
    }

    /// Reopen an upload started earlier, possibly by another process.
    #[tracing::instrument(skip(context), fields(name = %context.name))]
    pub(crate) async fn resume(context: UploadContext, id: Uuid) -> RegistryResult<Self> {
        let startedat = context
            .paths
            .path(PathSpec::UploadStartedAt(&context.name, &id));
        let content = context
            .storage
            .get_content(&startedat)
            .await
            .or_unknown(|| RegistryError::UploadUnknown(id))?;

        let started = std::str::from_utf8(&content)
            .map_err(|err| corrupt(&startedat, err))
            .and_then(|text| {
                DateTime::parse_from_rfc3339(text.trim()).map_err(|err| corrupt(&startedat, err))
            })?
            .with_timezone(&Utc);

        tracing::debug!(%id, "Resumed upload");
        Ok(Self::open(id, started, context))
    }

    fn open(id: Uuid, started: DateTime<Utc>, context: UploadContext) -> Self {
        Self {
            id,
            started,
            context,
            digester: Algorithm::Sha256.digester(),
            hashed: 0,
            state: UploadState::Writing,
        }
    }

    /// The upload's identifier, used to resume or cancel it.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Repository the upload belongs to.
    pub fn name(&self) -> &RepositoryName {
        &self.context.name
    }

    /// When the upload was started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started
    }

    /// Current lifecycle state.
    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Number of bytes covered by the running digest.
    pub fn digest_offset(&self) -> u64 {
        self.hashed
    }

    fn data_path(&self) -> Utf8PathBuf {
        self.context
            .paths
            .path(PathSpec::UploadData(&self.context.name, &self.id))
    }

    fn upload_path(&self) -> Utf8PathBuf {
        self.context
            .paths
            .path(PathSpec::Upload(&self.context.name, &self.id))
    }

    fn ensure_open(&self) -> RegistryResult<()> {
        match self.state {
            UploadState::Writing => Ok(()),
            UploadState::Finished | UploadState::Cancelled => Err(RegistryError::LayerClosed),
        }
    }

    /// Bytes durably stored so far.
    pub async fn size(&self) -> RegistryResult<u64> {
        self.ensure_open()?;
        let metadata = self
            .context
            .storage
            .stat(&self.data_path())
            .await
            .or_unknown(|| RegistryError::UploadUnknown(self.id))?;
        Ok(metadata.size)
    }

    /// Append `data`, which must start at the current size.
    pub async fn write(&mut self, offset: u64, data: &[u8]) -> RegistryResult<u64> {
        let mut data = data;
        self.write_from(offset, &mut data).await
    }

    /// Append everything `reader` yields, starting at the current size.
    ///
    /// Returns the number of bytes written.
    #[tracing::instrument(skip(self, reader), fields(name = %self.context.name, id = %self.id))]
    pub async fn write_from<R>(&mut self, offset: u64, reader: &mut R) -> RegistryResult<u64>
    where
        R: AsyncBufRead + Unpin + Send + Sync,
    {
        let size = self.size().await?;
        if offset != size {
            return Err(RegistryError::InvalidOffset {
                expected: size,
                requested: offset,
            });
        }
        self.catch_up(size).await?;

        let path = self.data_path();
        let mut hashing = BufReader::new(HashingReader::new(reader, self.digester.clone()));
        let written = self
            .context
            .storage
            .write_stream(&path, offset, &mut hashing)
            .await?;

        let (pending, read) = hashing.into_inner().into_parts();
        if read == written {
            self.digester = pending;
            self.hashed += written;
        } else {
            tracing::debug!(read, written, "Partial write, digest will catch up");
        }

        tracing::trace!(offset, written, "Wrote chunk");
        Ok(written)
    }

    /// Bring the running digest up to `size` by re-reading durable bytes.
    async fn catch_up(&mut self, size: u64) -> RegistryResult<()> {
        if self.hashed > size {
            tracing::debug!(hashed = self.hashed, size, "Upload shrank, rehashing");
            self.digester = self.digester.algorithm().digester();
            self.hashed = 0;
        }
        if self.hashed == size {
            return Ok(());
        }

        let path = self.data_path();
        let stream = self
            .context
            .storage
            .read_stream(&path, self.hashed)
            .await
            .or_unknown(|| RegistryError::UploadUnknown(self.id))?;
        let mut stream = stream.take(size - self.hashed);

        let mut buf = vec![0; CATCH_UP_CHUNK];
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            self.digester.update(&buf[..n]);
            self.hashed += n as u64;
        }

        tracing::trace!(hashed = self.hashed, "Caught up digest");
        Ok(())
    }

    /// Hash the whole upload with `algorithm`.
    async fn rehash(&self, algorithm: Algorithm) -> RegistryResult<Digest> {
        let mut stream = self
            .context
            .storage
            .read_stream(&self.data_path(), 0)
            .await
            .or_unknown(|| RegistryError::UploadUnknown(self.id))?;

        let mut digester = algorithm.digester();
        let mut buf = vec![0; CATCH_UP_CHUNK];
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            digester.update(&buf[..n]);
        }
        Ok(digester.finalize())
    }

    /// Verify the upload against `expected` and commit it.
    ///
    /// On a mismatch nothing is changed: the data stays in place and the
    /// writer can keep going or be cancelled. If an earlier attempt already
    /// moved the data into the blob store but failed to link it, finishing
    /// again completes the link.
    #[tracing::instrument(skip(self), fields(name = %self.context.name, id = %self.id, %expected))]
    pub async fn finish(&mut self, expected: &Digest) -> RegistryResult<Descriptor> {
        self.ensure_open()?;
        let data = self.context.storage.stat(&self.data_path()).await.found()?;
        if data.is_none() && self.context.blobs.exists(expected).await? {
            tracing::debug!("Upload data already committed, linking");
            return self.commit(expected).await;
        }

        let size = self.size().await?;
        self.catch_up(size).await?;

        let actual = if expected.algorithm() == self.digester.algorithm() {
            self.digester.clone().finalize()
        } else {
            self.rehash(expected.algorithm()).await?
        };

        if actual != *expected {
            tracing::debug!(%actual, "Digest mismatch");
            return Err(RegistryError::DigestMismatch {
                expected: expected.clone(),
                actual,
            });
        }

        if self.context.blobs.exists(expected).await? {
            tracing::debug!("Blob already present, discarding upload data");
        } else {
            self.context
                .storage
                .rename(&self.data_path(), &self.context.blobs.path(expected))
                .await?;
        }

        self.commit(expected).await
    }

    /// Link the committed blob and retire the upload.
    async fn commit(&mut self, expected: &Digest) -> RegistryResult<Descriptor> {
        let blob_path = self.context.blobs.path(expected);
        self.context.links.create(expected, &blob_path).await?;
        remove_upload(&self.context.storage, &self.upload_path()).await;
        self.state = UploadState::Finished;

        let descriptor = self.context.blobs.stat(expected).await?;
        tracing::debug!(size = descriptor.size, "Finished upload");
        Ok(descriptor)
    }

    /// Abandon the upload and remove its data.
    ///
    /// Cancelling twice is harmless; cancelling a finished upload is not.
    #[tracing::instrument(skip(self), fields(name = %self.context.name, id = %self.id))]
    pub async fn cancel(&mut self) -> RegistryResult<()> {
        match self.state {
            UploadState::Writing => {}
            UploadState::Cancelled => return Ok(()),
            UploadState::Finished => return Err(RegistryError::LayerClosed),
        }

        remove_upload(&self.context.storage, &self.upload_path()).await;
        self.state = UploadState::Cancelled;
        Ok(())
    }
}

fn corrupt<E>(path: &Utf8Path, error: E) -> RegistryError
where
    E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
{
    StorageError::builder("upload", StorageErrorKind::Other, error)
        .path(path.as_str())
        .context("unreadable start time")
        .build()
        .into()
}
