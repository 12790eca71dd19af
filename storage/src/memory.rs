use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use storage_driver::{Driver, Metadata, ReadStream, Reader, StorageError, StorageErrorKind};

#[derive(Debug, Clone)]
struct MemoryFile {
    modified: DateTime<Utc>,
    data: Vec<u8>,
}

impl From<Vec<u8>> for MemoryFile {
    fn from(data: Vec<u8>) -> Self {
        Self {
            modified: Utc::now(),
            data,
        }
    }
}

impl From<&MemoryFile> for Metadata {
    fn from(value: &MemoryFile) -> Self {
        Self {
            modified: value.modified,
            size: value.data.len() as u64,
            is_dir: false,
        }
    }
}

/// Storage driver that keeps every file in memory.
///
/// Directories are implicit: a directory exists while any file lives beneath it.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    files: RwLock<BTreeMap<Utf8PathBuf, MemoryFile>>,
}

impl MemoryDriver {
    /// Create a new, empty `MemoryDriver`.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Whether `candidate` lives strictly beneath `dir`.
fn is_descendant(candidate: &Utf8Path, dir: &Utf8Path) -> bool {
    candidate != dir && candidate.starts_with(dir)
}

#[async_trait::async_trait]
impl Driver for MemoryDriver {
    fn name(&self) -> &'static str {
        "inmemory"
    }

    async fn get_content(&self, path: &Utf8Path) -> Result<Bytes, StorageError> {
        let files = self.files.read().await;
        let file = files
            .get(path)
            .ok_or_else(|| StorageError::not_found(self.name(), path))?;
        Ok(Bytes::copy_from_slice(&file.data))
    }

    async fn put_content(&self, path: &Utf8Path, contents: &[u8]) -> Result<(), StorageError> {
        let mut files = self.files.write().await;
        files.insert(path.to_owned(), contents.to_vec().into());
        Ok(())
    }

    async fn read_stream(&self, path: &Utf8Path, offset: u64) -> Result<ReadStream, StorageError> {
        let files = self.files.read().await;
        let file = files
            .get(path)
            .ok_or_else(|| StorageError::not_found(self.name(), path))?;

        let size = file.data.len() as u64;
        if offset > size {
            return Err(StorageError::invalid_offset(
                self.name(),
                path,
                offset,
                size,
            ));
        }

        let contents = Bytes::copy_from_slice(&file.data[offset as usize..]);
        Ok(Box::new(std::io::Cursor::new(contents)))
    }

    async fn write_stream(
        &self,
        path: &Utf8Path,
        offset: u64,
        reader: &mut Reader<'_>,
    ) -> Result<u64, StorageError> {
        let mut buf = Vec::new();
        tokio::io::copy(reader, &mut buf)
            .await
            .map_err(|err| StorageError::io(self.name(), path, err))?;

        let mut files = self.files.write().await;
        let size = files
            .get(path)
            .map(|file| file.data.len() as u64)
            .unwrap_or_default();
        if offset > size {
            return Err(StorageError::invalid_offset(
                self.name(),
                path,
                offset,
                size,
            ));
        }

        let file = files
            .entry(path.to_owned())
            .or_insert_with(|| Vec::new().into());
        let start = offset as usize;
        let end = start + buf.len();
        if end > file.data.len() {
            file.data.resize(end, 0);
        }
        file.data[start..end].copy_from_slice(&buf);
        file.modified = Utc::now();

        tracing::trace!(%path, offset, written = buf.len(), "write stream");
        Ok(buf.len() as u64)
    }

    async fn stat(&self, path: &Utf8Path) -> Result<Metadata, StorageError> {
        let files = self.files.read().await;
        if let Some(file) = files.get(path) {
            return Ok(file.into());
        }

        files
            .iter()
            .filter(|(candidate, _)| is_descendant(candidate, path))
            .map(|(_, file)| file.modified)
            .max()
            .map(|modified| Metadata {
                size: 0,
                modified,
                is_dir: true,
            })
            .ok_or_else(|| StorageError::not_found(self.name(), path))
    }

    async fn list(&self, path: &Utf8Path) -> Result<Vec<Utf8PathBuf>, StorageError> {
        tracing::trace!(%path, "list memory driver");

        let files = self.files.read().await;
        if files.contains_key(path) {
            return Err(StorageError::builder(
                self.name(),
                StorageErrorKind::InvalidRequest,
                format!("not a directory: {path}"),
            )
            .path(path.as_str())
            .context("list")
            .build());
        }

        let children: BTreeSet<Utf8PathBuf> = files
            .keys()
            .filter_map(|candidate| candidate.strip_prefix(path).ok())
            .filter_map(|relative| relative.components().next())
            .map(|child| path.join(child))
            .collect();

        if children.is_empty() {
            return Err(StorageError::not_found(self.name(), path));
        }

        Ok(children.into_iter().collect())
    }

    async fn rename(
        &self,
        source: &Utf8Path,
        destination: &Utf8Path,
    ) -> Result<(), StorageError> {
        let mut files = self.files.write().await;

        let moving: Vec<Utf8PathBuf> = files
            .keys()
            .filter(|candidate| candidate.starts_with(source))
            .cloned()
            .collect();
        if moving.is_empty() {
            return Err(StorageError::not_found(self.name(), source));
        }

        files.retain(|candidate, _| !candidate.starts_with(destination));

        for old in moving {
            if let Some(file) = files.remove(&old) {
                let relative = old.strip_prefix(source).unwrap_or(Utf8Path::new(""));
                let new = if relative.as_str().is_empty() {
                    destination.to_owned()
                } else {
                    destination.join(relative)
                };
                files.insert(new, file);
            }
        }

        Ok(())
    }

    async fn delete(&self, path: &Utf8Path) -> Result<(), StorageError> {
        let mut files = self.files.write().await;
        let before = files.len();
        files.retain(|candidate, _| !candidate.starts_with(path));

        if files.len() == before {
            return Err(StorageError::not_found(self.name(), path));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_stream_appends_at_offset() {
        let driver = MemoryDriver::new();
        let path = Utf8Path::new("/uploads/one/data");

        let written = driver
            .write_stream(path, 0, &mut &b"hello"[..])
            .await
            .unwrap();
        assert_eq!(written, 5);

        driver
            .write_stream(path, 5, &mut &b" world"[..])
            .await
            .unwrap();
        assert_eq!(&driver.get_content(path).await.unwrap()[..], b"hello world");

        let err = driver
            .write_stream(path, 20, &mut &b"!"[..])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::InvalidOffset);
    }

    #[tokio::test]
    async fn list_returns_direct_children() {
        let driver = MemoryDriver::new();
        driver.put_content(Utf8Path::new("/a/b/c"), b"1").await.unwrap();
        driver.put_content(Utf8Path::new("/a/b/d/e"), b"2").await.unwrap();
        driver.put_content(Utf8Path::new("/a/f"), b"3").await.unwrap();

        let children = driver.list(Utf8Path::new("/a/b")).await.unwrap();
        assert_eq!(
            children,
            vec![Utf8PathBuf::from("/a/b/c"), Utf8PathBuf::from("/a/b/d")]
        );

        assert!(driver.stat(Utf8Path::new("/a/b/d")).await.unwrap().is_dir);
        assert!(driver.list(Utf8Path::new("/nope")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn rename_and_delete_subtrees() {
        let driver = MemoryDriver::new();
        driver.put_content(Utf8Path::new("/src/x/data"), b"x").await.unwrap();
        driver.put_content(Utf8Path::new("/src/x/meta"), b"m").await.unwrap();

        driver
            .rename(Utf8Path::new("/src/x"), Utf8Path::new("/dst/y"))
            .await
            .unwrap();
        assert_eq!(&driver.get_content(Utf8Path::new("/dst/y/data")).await.unwrap()[..], b"x");
        assert!(driver.stat(Utf8Path::new("/src/x")).await.unwrap_err().is_not_found());

        driver.delete(Utf8Path::new("/dst")).await.unwrap();
        assert!(driver.delete(Utf8Path::new("/dst")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn read_stream_from_offset() {
        use tokio::io::AsyncReadExt;

        let driver = MemoryDriver::new();
        driver.put_content(Utf8Path::new("/f"), b"0123456789").await.unwrap();

        let mut reader = driver.read_stream(Utf8Path::new("/f"), 4).await.unwrap();
        let mut buf = String::new();
        reader.read_to_string(&mut buf).await.unwrap();
        assert_eq!(buf, "456789");

        let err = driver.read_stream(Utf8Path::new("/f"), 11).await.err().unwrap();
        assert_eq!(err.kind(), StorageErrorKind::InvalidOffset);
    }
}
