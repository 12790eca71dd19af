//! # Storage backends
//!
//! Driver implementations and the shared [`Storage`] handle which the
//! registry core talks to.

use std::sync::Arc;

use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

pub mod factory;

#[cfg(feature = "local")]
pub(crate) mod local;

pub(crate) mod memory;
#[cfg(feature = "tmp")]
pub(crate) mod temp;

#[doc(inline)]
pub use factory::{DriverFactory, DriverRegistry, Parameters};

#[cfg(feature = "local")]
#[doc(inline)]
pub use local::FilesystemDriver;

#[doc(inline)]
pub use memory::MemoryDriver;

#[cfg(feature = "tmp")]
#[doc(inline)]
pub use temp::TempDriver;

#[doc(inline)]
pub use storage_driver::{
    Driver, Metadata, ReadStream, Reader, StorageError, StorageErrorKind,
};

/// Storage driver selection, as found in configuration files.
///
/// ```toml
/// driver = "filesystem"
/// parameters = { root = "/var/lib/registry" }
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageConfig {
    /// Name of the driver, as registered with a [`DriverRegistry`].
    pub driver: String,

    /// Driver specific parameters.
    #[serde(default)]
    pub parameters: Parameters,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            driver: "inmemory".into(),
            parameters: Parameters::new(),
        }
    }
}

impl StorageConfig {
    /// Build the configured driver using the factories in `drivers`.
    #[tracing::instrument(skip(drivers), fields(driver = %self.driver))]
    pub fn build(&self, drivers: &DriverRegistry) -> Result<Storage, StorageError> {
        drivers.create(&self.driver, &self.parameters)
    }
}

pub(crate) type ArcDriver = Arc<dyn Driver + Send + Sync>;

/// A cheaply cloneable handle to a storage driver.
#[derive(Debug, Clone)]
pub struct Storage {
    driver: ArcDriver,
}

impl<D> From<D> for Storage
where
    D: Driver + Send + Sync + 'static,
{
    fn from(value: D) -> Self {
        Storage::new(value)
    }
}

impl Storage {
    /// Wrap a driver in a storage handle.
    pub fn new<D: Driver + Send + Sync + 'static>(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    /// The name of the underlying driver.
    pub fn name(&self) -> &str {
        self.driver.name()
    }

    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn get_content(&self, path: &Utf8Path) -> Result<Bytes, StorageError> {
        self.driver.get_content(path).await
    }

    #[tracing::instrument(skip(self, contents), fields(driver=self.driver.name(), size=contents.len()))]
    pub async fn put_content(&self, path: &Utf8Path, contents: &[u8]) -> Result<(), StorageError> {
        tracing::trace!(%path, "Writing content to: {path}");
        self.driver.put_content(path, contents).await
    }

    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn read_stream(&self, path: &Utf8Path, offset: u64) -> Result<ReadStream, StorageError> {
        self.driver.read_stream(path, offset).await
    }

    #[tracing::instrument(skip(self, reader), fields(driver=self.driver.name()))]
    pub async fn write_stream<'d, R>(
        &'d self,
        path: &Utf8Path,
        offset: u64,
        reader: &mut R,
    ) -> Result<u64, StorageError>
    where
        R: tokio::io::AsyncBufRead + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%path, offset, "Writing stream to: {path}");
        self.driver.write_stream(path, offset, reader).await
    }

    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn stat(&self, path: &Utf8Path) -> Result<Metadata, StorageError> {
        self.driver.stat(path).await
    }

    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn list(&self, path: &Utf8Path) -> Result<Vec<Utf8PathBuf>, StorageError> {
        self.driver.list(path).await
    }

    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn rename(
        &self,
        source: &Utf8Path,
        destination: &Utf8Path,
    ) -> Result<(), StorageError> {
        self.driver.rename(source, destination).await
    }

    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn delete(&self, path: &Utf8Path) -> Result<(), StorageError> {
        self.driver.delete(path).await
    }
}
