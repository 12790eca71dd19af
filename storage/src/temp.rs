use std::io;

use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

use crate::local::FilesystemDriver;
use storage_driver::{Driver, Metadata, ReadStream, Reader, StorageError};

/// A storage driver that stores files in a temporary directory, removed on drop.
#[derive(Debug)]
pub struct TempDriver {
    #[allow(unused)]
    dir: TempDir,
    driver: FilesystemDriver,
}

impl TempDriver {
    /// Create a new `TempDriver` instance, storing files in a fresh temporary directory.
    pub fn new() -> io::Result<Self> {
        let tmp = TempDir::new()?;
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_owned()).map_err(|path| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("temporary directory is not UTF-8: {}", path.display()),
            )
        })?;

        Ok(Self {
            dir: tmp,
            driver: FilesystemDriver::new(root),
        })
    }

    /// The temporary directory backing this driver.
    pub fn root(&self) -> &Utf8Path {
        self.driver.root()
    }
}

#[async_trait::async_trait]
impl Driver for TempDriver {
    fn name(&self) -> &'static str {
        "temp"
    }

    async fn get_content(&self, path: &Utf8Path) -> Result<Bytes, StorageError> {
        self.driver.get_content(path).await
    }

    async fn put_content(&self, path: &Utf8Path, contents: &[u8]) -> Result<(), StorageError> {
        self.driver.put_content(path, contents).await
    }

    async fn read_stream(&self, path: &Utf8Path, offset: u64) -> Result<ReadStream, StorageError> {
        self.driver.read_stream(path, offset).await
    }

    async fn write_stream(
        &self,
        path: &Utf8Path,
        offset: u64,
        reader: &mut Reader<'_>,
    ) -> Result<u64, StorageError> {
        self.driver.write_stream(path, offset, reader).await
    }

    async fn stat(&self, path: &Utf8Path) -> Result<Metadata, StorageError> {
        self.driver.stat(path).await
    }

    async fn list(&self, path: &Utf8Path) -> Result<Vec<Utf8PathBuf>, StorageError> {
        self.driver.list(path).await
    }

    async fn rename(
        &self,
        source: &Utf8Path,
        destination: &Utf8Path,
    ) -> Result<(), StorageError> {
        self.driver.rename(source, destination).await
    }

    async fn delete(&self, path: &Utf8Path) -> Result<(), StorageError> {
        self.driver.delete(path).await
    }
}
