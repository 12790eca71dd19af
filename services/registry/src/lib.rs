//! # Container registry storage
//!
//! Content addressed blob and manifest storage for an OCI / Docker
//! distribution registry, layered over any [`storage::Driver`].
//!
//! ## Features
//!
//! - Blobs stored once by digest and shared between repositories through links
//! - Resumable, verified uploads that survive process restarts
//! - Signed schema 1 manifests with tag indirection
//! - Repository catalog
//!
//! The HTTP API is not part of this crate. Every [`RegistryError`] carries an
//! OCI error code via [`RegistryError::error_code`] for a wire layer to use.
//!
//! ## Example
//!
//! ```no_run
//! use registry::{Digest, RegistryBuilder};
//! use storage::MemoryDriver;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = RegistryBuilder::new().storage(MemoryDriver::new()).build()?;
//! let repository = registry.repository("library/ubuntu")?;
//!
//! let mut upload = repository.layers().upload().await?;
//! upload.write(0, b"layer contents").await?;
//! let layer = upload.finish(&Digest::sha256(b"layer contents")).await?;
//!
//! let mut reader = repository.layers().fetch(&layer.digest).await?;
//! assert_eq!(&reader.read_to_end().await?[..], b"layer contents");
//! # Ok(())
//! # }
//! ```

mod blob;
mod config;
mod digest;
mod error;
mod link;
mod manifest;
mod name;
mod paths;
mod registry;
mod repository;
mod schema1;
mod upload;

pub use blob::{BlobReader, BlobStore, Descriptor};
pub use config::RegistryConfig;
pub use digest::{Algorithm, Digest, DigestError, Digester};
pub use error::{RegistryError, RegistryResult};
pub use manifest::Manifests;
pub use name::{NameError, RepositoryName, Tag, TagError};
pub use paths::{DEFAULT_ROOT, PathManager, PathSpec};
pub use registry::{Registry, RegistryBuilder};
pub use repository::{Layers, Repository};
pub use schema1::{FsLayer, History, JoseHeader, Manifest, SCHEMA_VERSION, Signature, SignedManifest};
pub use upload::{BlobWriter, UploadState};
