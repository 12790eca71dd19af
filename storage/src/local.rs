use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use tokio::io::{self, AsyncSeekExt, AsyncWriteExt};

use storage_driver::{Driver, Metadata, ReadStream, Reader, StorageError, StorageErrorKind};

/// Storage driver backed by a directory on the local filesystem.
///
/// Virtual paths are resolved beneath `root`.
#[derive(Debug)]
pub struct FilesystemDriver {
    root: Utf8PathBuf,
    scratch: AtomicU64,
}

impl FilesystemDriver {
    /// Create a driver rooted at `root`. The directory is created lazily on first write.
    pub fn new(root: Utf8PathBuf) -> Self {
        Self {
            root,
            scratch: AtomicU64::new(0),
        }
    }

    /// The directory this driver stores files in.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn path(&self, remote: &Utf8Path) -> Utf8PathBuf {
        self.root
            .join(remote.strip_prefix("/").unwrap_or(remote))
    }

    fn error(
        &self,
        remote: &Utf8Path,
        context: &'static str,
    ) -> impl FnOnce(io::Error) -> StorageError + '_ {
        let remote = remote.to_owned();
        move |err| {
            StorageError::builder(self.name(), err.kind().into(), err)
                .path(remote.as_str())
                .context(context)
                .build()
        }
    }

    async fn create_parent(&self, remote: &Utf8Path, local: &Utf8Path) -> Result<(), StorageError> {
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(self.error(remote, "create parent directories"))?;
        }
        Ok(())
    }
}

fn modified(metadata: &std::fs::Metadata) -> DateTime<Utc> {
    metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait::async_trait]
impl Driver for FilesystemDriver {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn get_content(&self, remote: &Utf8Path) -> Result<Bytes, StorageError> {
        let local = self.path(remote);
        let contents = tokio::fs::read(&local)
            .await
            .map_err(self.error(remote, "read"))?;
        Ok(contents.into())
    }

    async fn put_content(&self, remote: &Utf8Path, contents: &[u8]) -> Result<(), StorageError> {
        let local = self.path(remote);
        self.create_parent(remote, &local).await?;

        // Write beside the target and rename so readers never see a partial file.
        let scratch = local.with_file_name(format!(
            ".{}.{}.{}",
            local.file_name().unwrap_or("content"),
            std::process::id(),
            self.scratch.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&scratch, contents)
            .await
            .map_err(self.error(remote, "write scratch file"))?;
        tokio::fs::rename(&scratch, &local)
            .await
            .map_err(self.error(remote, "rename scratch file"))?;
        Ok(())
    }

    async fn read_stream(&self, remote: &Utf8Path, offset: u64) -> Result<ReadStream, StorageError> {
        let local = self.path(remote);
        let mut file = tokio::fs::File::open(&local)
            .await
            .map_err(self.error(remote, "open for reading"))?;

        let size = file
            .metadata()
            .await
            .map_err(self.error(remote, "metadata"))?
            .len();
        if offset > size {
            return Err(StorageError::invalid_offset(
                self.name(),
                remote,
                offset,
                size,
            ));
        }

        file.seek(io::SeekFrom::Start(offset))
            .await
            .map_err(self.error(remote, "seek"))?;
        Ok(Box::new(io::BufReader::new(file)))
    }

    async fn write_stream(
        &self,
        remote: &Utf8Path,
        offset: u64,
        reader: &mut Reader<'_>,
    ) -> Result<u64, StorageError> {
        let local = self.path(remote);
        if offset == 0 {
            self.create_parent(remote, &local).await?;
        }

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create(offset == 0)
            .truncate(false)
            .open(&local)
            .await
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::invalid_offset(self.name(), remote, offset, 0));
            }
            Err(err) => return Err(self.error(remote, "open for writing")(err)),
        };

        let size = file
            .metadata()
            .await
            .map_err(self.error(remote, "metadata"))?
            .len();
        if offset > size {
            return Err(StorageError::invalid_offset(
                self.name(),
                remote,
                offset,
                size,
            ));
        }

        file.seek(io::SeekFrom::Start(offset))
            .await
            .map_err(self.error(remote, "seek"))?;

        let written = tokio::io::copy(reader, &mut file)
            .await
            .map_err(self.error(remote, "copy"))?;

        file.shutdown()
            .await
            .map_err(self.error(remote, "shutdown file"))?;

        tracing::trace!(%remote, offset, written, "write stream");
        Ok(written)
    }

    async fn stat(&self, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let local = self.path(remote);
        let metadata = tokio::fs::metadata(&local)
            .await
            .map_err(self.error(remote, "metadata"))?;

        Ok(Metadata {
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            modified: modified(&metadata),
            is_dir: metadata.is_dir(),
        })
    }

    async fn list(&self, remote: &Utf8Path) -> Result<Vec<Utf8PathBuf>, StorageError> {
        let local = self.path(remote);
        let mut entries = match tokio::fs::read_dir(&local).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotADirectory => {
                return Err(StorageError::builder(
                    self.name(),
                    StorageErrorKind::InvalidRequest,
                    err,
                )
                .path(remote.as_str())
                .context("list")
                .build());
            }
            Err(err) => return Err(self.error(remote, "list")(err)),
        };

        let mut children = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(self.error(remote, "list entry"))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                tracing::warn!(%remote, ?name, "skipping non-UTF-8 directory entry");
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            children.push(remote.join(name));
        }

        children.sort();
        tracing::debug!(%remote, "Found {} entries", children.len());
        Ok(children)
    }

    async fn rename(
        &self,
        source: &Utf8Path,
        destination: &Utf8Path,
    ) -> Result<(), StorageError> {
        let from = self.path(source);
        let to = self.path(destination);

        tokio::fs::metadata(&from)
            .await
            .map_err(self.error(source, "rename source"))?;
        self.create_parent(destination, &to).await?;

        if let Ok(existing) = tokio::fs::metadata(&to).await {
            if existing.is_dir() {
                tokio::fs::remove_dir_all(&to)
                    .await
                    .map_err(self.error(destination, "clear rename destination"))?;
            }
        }

        tokio::fs::rename(&from, &to)
            .await
            .map_err(self.error(source, "rename"))?;
        Ok(())
    }

    async fn delete(&self, remote: &Utf8Path) -> Result<(), StorageError> {
        let local = self.path(remote);
        let metadata = tokio::fs::symlink_metadata(&local)
            .await
            .map_err(self.error(remote, "delete"))?;

        if metadata.is_dir() {
            tokio::fs::remove_dir_all(&local)
                .await
                .map_err(self.error(remote, "remove directory"))?;
        } else {
            tokio::fs::remove_file(&local)
                .await
                .map_err(self.error(remote, "remove file"))?;
        }
        Ok(())
    }
}
