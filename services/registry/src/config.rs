//! Registry configuration.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use storage::{DriverRegistry, StorageConfig};

use crate::error::RegistryResult;
use crate::registry::{Registry, RegistryBuilder};

/// Registry settings, as found in configuration files.
///
/// ```toml
/// root = "/docker/registry/v2"
///
/// [storage]
/// driver = "filesystem"
/// parameters = { root = "/var/lib/registry" }
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RegistryConfig {
    /// Storage prefix for all registry data. Defaults to `/docker/registry/v2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<Utf8PathBuf>,

    /// Storage backend.
    #[serde(default)]
    pub storage: StorageConfig,
}

impl RegistryConfig {
    /// Build a registry, creating the storage driver from `drivers`.
    pub fn build(&self, drivers: &DriverRegistry) -> RegistryResult<Registry> {
        let storage = self.storage.build(drivers)?;
        let mut builder = RegistryBuilder::new().storage(storage);
        if let Some(root) = &self.root {
            builder = builder.root(root.clone());
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RegistryError;

    #[test]
    fn defaults_to_memory() {
        let config: RegistryConfig = serde_json::from_str("{}").unwrap();
        let registry = config.build(&DriverRegistry::with_defaults()).unwrap();
        assert_eq!(registry.storage().name(), "inmemory");
        assert_eq!(registry.root().as_str(), crate::paths::DEFAULT_ROOT);
    }

    #[test]
    fn custom_root() {
        let config: RegistryConfig = serde_json::from_value(serde_json::json!({
            "root": "/registry",
            "storage": { "driver": "inmemory" },
        }))
        .unwrap();
        let registry = config.build(&DriverRegistry::with_defaults()).unwrap();
        assert_eq!(registry.root().as_str(), "/registry");
    }

    #[test]
    fn unknown_driver() {
        let config: RegistryConfig = serde_json::from_value(serde_json::json!({
            "storage": { "driver": "s3" },
        }))
        .unwrap();
        let err = config.build(&DriverRegistry::with_defaults()).unwrap_err();
        assert!(matches!(err, RegistryError::Storage(_)));
    }
}
