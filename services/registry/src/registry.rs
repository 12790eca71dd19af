//! The registry entry point and its builder.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use storage::Storage;

use crate::blob::BlobStore;
use crate::error::{RegistryError, RegistryResult, StorageResultExt};
use crate::name::RepositoryName;
use crate::paths::{PathManager, PathSpec};
use crate::repository::Repository;

/// Directories whose presence marks a repository.
const REPOSITORY_MARKERS: [&str; 3] = ["_layers", "_manifests", "_uploads"];

/// Builder for a [`Registry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    storage: Option<Storage>,
    root: Option<Utf8PathBuf>,
}

impl RegistryBuilder {
    /// Create a new registry builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the storage backend
    pub fn storage(mut self, storage: impl Into<Storage>) -> Self {
        self.storage = Some(storage.into());
        self
    }

    /// Place all registry data below `root` instead of the default.
    pub fn root(mut self, root: impl Into<Utf8PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Build the registry.
    pub fn build(self) -> RegistryResult<Registry> {
        let storage = self.storage.ok_or_else(|| {
            RegistryError::Config("storage backend must be configured".to_owned())
        })?;
        let paths = Arc::new(match self.root {
            Some(root) => PathManager::new(root),
            None => PathManager::default(),
        });

        tracing::debug!(driver = storage.name(), root = %paths.root(), "Built registry");
        let blobs = BlobStore::new(storage.clone(), paths.clone());
        Ok(Registry {
            storage,
            paths,
            blobs,
        })
    }
}

/// A container registry over a single storage backend.
///
/// Cheap to clone; every clone shares the same backend.
#[derive(Debug, Clone)]
pub struct Registry {
    storage: Storage,
    paths: Arc<PathManager>,
    blobs: BlobStore,
}

impl Registry {
    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Root below which all data is stored.
    pub fn root(&self) -> &Utf8Path {
        self.paths.root()
    }

    /// The storage backend.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// The blob store shared by all repositories.
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Open the repository `name`, which is validated before any storage access.
    pub fn repository(&self, name: &str) -> RegistryResult<Repository> {
        let name: RepositoryName = name.parse()?;
        Ok(Repository::new(
            name,
            self.storage.clone(),
            self.paths.clone(),
            self.blobs.clone(),
        ))
    }

    /// Every repository with stored layers, manifests or uploads, sorted by name.
    ///
    /// A repository whose only uploads were cancelled is not listed.
    #[tracing::instrument(skip(self))]
    pub async fn catalog(&self) -> RegistryResult<Vec<RepositoryName>> {
        let root = self.paths.path(PathSpec::Repositories);
        let mut pending = vec![root.clone()];
        let mut names = Vec::new();

        while let Some(dir) = pending.pop() {
            let Some(children) = self.storage.list(&dir).await.found()? else {
                continue;
            };

            let mut markers = Vec::new();
            for child in children {
                match child.file_name() {
                    Some(name) if REPOSITORY_MARKERS.contains(&name) => markers.push(child),
                    Some(name) if name.starts_with('_') => {}
                    Some(_) => pending.push(child),
                    None => {}
                }
            }

            // Empty markers are left behind by cancelled uploads.
            let mut marked = false;
            for marker in markers {
                let entries = self.storage.list(&marker).await.found()?;
                if entries.is_some_and(|entries| !entries.is_empty()) {
                    marked = true;
                    break;
                }
            }
            if !marked {
                continue;
            }
            let Ok(relative) = dir.strip_prefix(&root) else {
                continue;
            };
            match relative.as_str().parse::<RepositoryName>() {
                Ok(name) => names.push(name),
                Err(err) => tracing::warn!(path = %dir, "Skipping invalid repository: {err}"),
            }
        }

        names.sort();
        tracing::trace!("Found {} repositories", names.len());
        Ok(names)
    }
}
