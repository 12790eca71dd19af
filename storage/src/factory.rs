//! An explicit registry of named storage driver factories.
//!
//! A [`DriverRegistry`] is built once at startup, populated with the drivers
//! the process supports, and passed to whatever needs to turn configuration
//! into a [`Storage`] handle.

use std::{collections::BTreeMap, fmt, sync::Arc};

#[cfg(feature = "local")]
use camino::Utf8PathBuf;
use eyre::eyre;
#[cfg(feature = "local")]
use eyre::WrapErr;
#[cfg(feature = "local")]
use serde::Deserialize;
use storage_driver::{StorageError, StorageErrorKind};

use crate::Storage;

/// Free-form driver parameters, as found in configuration files.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// Constructs a storage driver from its parameters.
pub trait DriverFactory: Send + Sync {
    /// Create a storage handle from the given parameters.
    fn create(&self, parameters: &Parameters) -> Result<Storage, StorageError>;
}

impl<F> DriverFactory for F
where
    F: Fn(&Parameters) -> Result<Storage, StorageError> + Send + Sync,
{
    fn create(&self, parameters: &Parameters) -> Result<Storage, StorageError> {
        (self)(parameters)
    }
}

/// A registry of storage drivers, keyed by driver name.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    factories: BTreeMap<String, Arc<dyn DriverFactory>>,
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Parameters accepted by the `filesystem` driver.
#[cfg(feature = "local")]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FilesystemParameters {
    /// Directory under which all files are stored.
    pub root: Utf8PathBuf,
}

impl DriverRegistry {
    /// Create a new `DriverRegistry` with no drivers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every driver built into this crate.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register("inmemory", |_: &Parameters| -> Result<Storage, StorageError> {
            Ok(Storage::new(crate::MemoryDriver::new()))
        });

        #[cfg(feature = "local")]
        registry.register("filesystem", |parameters: &Parameters| -> Result<Storage, StorageError> {
            let parameters: FilesystemParameters =
                serde_json::from_value(serde_json::Value::Object(parameters.clone()))
                    .wrap_err("filesystem driver parameters")
                    .map_err(StorageError::with(
                        "filesystem",
                        StorageErrorKind::InvalidRequest,
                    ))?;
            Ok(Storage::new(crate::FilesystemDriver::new(parameters.root)))
        });

        #[cfg(feature = "tmp")]
        registry.register("temp", |_: &Parameters| -> Result<Storage, StorageError> {
            let driver = crate::TempDriver::new()
                .map_err(StorageError::with("temp", StorageErrorKind::Io))?;
            Ok(Storage::new(driver))
        });

        registry
    }

    /// Register a driver factory under `name`, replacing any previous registration.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: DriverFactory + 'static,
    {
        let name = name.into();
        if self.factories.contains_key(&name) {
            tracing::warn!(driver = %name, "Replacing registered storage driver");
        }
        self.factories.insert(name, Arc::new(factory));
    }

    /// The names of all registered drivers, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Construct the driver registered as `name`.
    #[tracing::instrument(skip(self, parameters))]
    pub fn create(&self, name: &str, parameters: &Parameters) -> Result<Storage, StorageError> {
        let factory = self.factories.get(name).ok_or_else(|| {
            StorageError::builder(
                "registry",
                StorageErrorKind::InvalidRequest,
                eyre!("storage driver {name} is not registered"),
            )
            .context("create driver")
            .build()
        })?;

        tracing::debug!(driver = %name, "Creating storage driver");
        factory.create(parameters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_driver_is_invalid_request() {
        let registry = DriverRegistry::new();
        let err = registry.create("s3", &Parameters::new()).unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::InvalidRequest);
    }

    #[test]
    fn defaults_include_inmemory() {
        let registry = DriverRegistry::with_defaults();
        assert!(registry.names().any(|name| name == "inmemory"));

        let storage = registry.create("inmemory", &Parameters::new()).unwrap();
        assert_eq!(storage.name(), "inmemory");
    }

    #[cfg(feature = "local")]
    #[test]
    fn filesystem_requires_root() {
        let registry = DriverRegistry::with_defaults();
        let err = registry
            .create("filesystem", &Parameters::new())
            .unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::InvalidRequest);

        let mut parameters = Parameters::new();
        parameters.insert("root".into(), "/var/lib/registry".into());
        let storage = registry.create("filesystem", &parameters).unwrap();
        assert_eq!(storage.name(), "filesystem");
    }

    #[test]
    fn custom_factories_can_be_registered() {
        let mut registry = DriverRegistry::new();
        registry.register("scratch", |_: &Parameters| -> Result<Storage, StorageError> {
            Ok(Storage::new(crate::MemoryDriver::new()))
        });
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["scratch"]);
    }
}
