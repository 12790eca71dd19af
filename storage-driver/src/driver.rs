use std::{fmt, ops::Deref, sync::Arc};

use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use tokio::io;

use crate::error::StorageError;

/// A reader stream for file contents.
pub type Reader<'r> = dyn io::AsyncBufRead + Unpin + Send + Sync + 'r;

/// An owned reader stream, as returned by [`Driver::read_stream`].
pub type ReadStream = Box<Reader<'static>>;

/// File object metadata, which will be generically provided by the driver.
///
/// This struct only provides common metadata fields, and drivers may provide more specific
/// metadata fields directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Metadata {
    /// The size of the file in bytes. Zero for directories.
    pub size: u64,

    /// The last modification timestamp of the file.
    pub modified: DateTime<Utc>,

    /// Whether this path names a directory rather than a file.
    pub is_dir: bool,
}

/// A storage driver, which provides positional byte access to a hierarchy of
/// slash-separated virtual paths.
///
/// Paths are absolute (`/a/b/c`). Parent directories are implicit: writing a
/// file creates them, and deleting a directory deletes everything beneath it.
#[async_trait::async_trait]
pub trait Driver: fmt::Debug {
    /// The name of the driver.
    fn name(&self) -> &'static str;

    /// Read the full contents of a file.
    async fn get_content(&self, path: &Utf8Path) -> Result<Bytes, StorageError>;

    /// Replace the contents of a file, creating it (and any parents) if needed.
    async fn put_content(&self, path: &Utf8Path, contents: &[u8]) -> Result<(), StorageError>;

    /// Open a stream over a file, starting at `offset`.
    ///
    /// Fails with [`StorageErrorKind::InvalidOffset`](crate::StorageErrorKind::InvalidOffset)
    /// when `offset` is beyond the end of the file.
    async fn read_stream(&self, path: &Utf8Path, offset: u64) -> Result<ReadStream, StorageError>;

    /// Write the contents of `reader` into a file starting at `offset`,
    /// returning the number of bytes written.
    ///
    /// Bytes already present past `offset` are overwritten, not truncated. A
    /// missing file is created when `offset` is zero; otherwise `offset` must
    /// not exceed the current size.
    async fn write_stream(
        &self,
        path: &Utf8Path,
        offset: u64,
        reader: &mut Reader<'_>,
    ) -> Result<u64, StorageError>;

    /// Get the metadata for a file or directory.
    async fn stat(&self, path: &Utf8Path) -> Result<Metadata, StorageError>;

    /// List the direct children of a directory, as full paths.
    async fn list(&self, path: &Utf8Path) -> Result<Vec<Utf8PathBuf>, StorageError>;

    /// Move a file or directory, replacing anything at `destination`.
    async fn rename(
        &self,
        source: &Utf8Path,
        destination: &Utf8Path,
    ) -> Result<(), StorageError>;

    /// Delete a file, or a directory and everything beneath it.
    async fn delete(&self, path: &Utf8Path) -> Result<(), StorageError>;
}

#[async_trait::async_trait]
impl<D> Driver for Arc<D>
where
    D: ?Sized + Driver + Sync + Send + 'static,
{
    fn name(&self) -> &'static str {
        self.deref().name()
    }

    async fn get_content(&self, path: &Utf8Path) -> Result<Bytes, StorageError> {
        self.deref().get_content(path).await
    }

    async fn put_content(&self, path: &Utf8Path, contents: &[u8]) -> Result<(), StorageError> {
        self.deref().put_content(path, contents).await
    }

    async fn read_stream(&self, path: &Utf8Path, offset: u64) -> Result<ReadStream, StorageError> {
        self.deref().read_stream(path, offset).await
    }

    async fn write_stream(
        &self,
        path: &Utf8Path,
        offset: u64,
        reader: &mut Reader<'_>,
    ) -> Result<u64, StorageError> {
        self.deref().write_stream(path, offset, reader).await
    }

    async fn stat(&self, path: &Utf8Path) -> Result<Metadata, StorageError> {
        self.deref().stat(path).await
    }

    async fn list(&self, path: &Utf8Path) -> Result<Vec<Utf8PathBuf>, StorageError> {
        self.deref().list(path).await
    }

    async fn rename(
        &self,
        source: &Utf8Path,
        destination: &Utf8Path,
    ) -> Result<(), StorageError> {
        self.deref().rename(source, destination).await
    }

    async fn delete(&self, path: &Utf8Path) -> Result<(), StorageError> {
        self.deref().delete(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_obj_safe!(Driver);
}
