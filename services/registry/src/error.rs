//! Error types for the registry

use uuid::Uuid;

use crate::digest::{Digest, DigestError};
use crate::name::{NameError, RepositoryName, TagError};

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error types for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No blob is stored for this digest.
    #[error("blob unknown to registry: {0}")]
    BlobUnknown(Digest),

    /// The repository has no link to this digest.
    #[error("layer {digest} unknown to repository {name}")]
    LayerUnknown {
        /// Repository that was asked.
        name: RepositoryName,
        /// Digest that could not be resolved.
        digest: Digest,
    },

    /// The tag or manifest digest could not be resolved.
    #[error("manifest unknown: {name}:{reference}")]
    ManifestUnknown {
        /// Repository that was asked.
        name: RepositoryName,
        /// Tag or digest that was asked for.
        reference: String,
    },

    /// No upload was started with this UUID.
    #[error("upload unknown: {0}")]
    UploadUnknown(Uuid),

    /// A read or write was requested at an offset inconsistent with stored data.
    #[error("invalid offset {requested}, expected {expected}")]
    InvalidOffset {
        /// The offset the stored data allows.
        expected: u64,
        /// The offset that was requested.
        requested: u64,
    },

    /// The uploaded content does not hash to the claimed digest.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Expected digest
        expected: Digest,
        /// Actual digest
        actual: Digest,
    },

    /// Invalid repository name
    #[error("invalid repository name: {0}")]
    InvalidName(#[from] NameError),

    /// Invalid tag
    #[error(transparent)]
    InvalidTag(#[from] TagError),

    /// Invalid digest format
    #[error("invalid digest: {0}")]
    InvalidDigestFormat(#[from] DigestError),

    /// The upload or blob stream has already been closed.
    #[error("layer closed")]
    LayerClosed,

    /// The manifest declares a schema version this store does not handle.
    #[error("unsupported manifest schema version {0}")]
    UnsupportedSchemaVersion(u64),

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    ManifestInvalid(String),

    /// The manifest signatures are structurally malformed.
    #[error("invalid manifest signature: {0}")]
    SignatureInvalid(String),

    /// The operation is deliberately not supported.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),

    /// IO error while streaming blob content
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RegistryError {
    /// Get the error code for OCI error responses
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::BlobUnknown(_) | RegistryError::LayerUnknown { .. } => "BLOB_UNKNOWN",
            RegistryError::ManifestUnknown { .. } => "MANIFEST_UNKNOWN",
            RegistryError::UploadUnknown(_) => "BLOB_UPLOAD_UNKNOWN",
            RegistryError::InvalidOffset { .. } | RegistryError::LayerClosed => {
                "BLOB_UPLOAD_INVALID"
            }
            RegistryError::DigestMismatch { .. } | RegistryError::InvalidDigestFormat(_) => {
                "DIGEST_INVALID"
            }
            RegistryError::InvalidName(_) => "NAME_INVALID",
            RegistryError::InvalidTag(_) => "TAG_INVALID",
            RegistryError::UnsupportedSchemaVersion(_) | RegistryError::ManifestInvalid(_) => {
                "MANIFEST_INVALID"
            }
            RegistryError::SignatureInvalid(_) => "MANIFEST_UNVERIFIED",
            RegistryError::Unsupported(_) => "UNSUPPORTED",
            RegistryError::Storage(_) | RegistryError::Io(_) | RegistryError::Config(_) => {
                "UNKNOWN"
            }
        }
    }

    /// Whether the error is a missing-object condition rather than a failure.
    pub fn is_unknown(&self) -> bool {
        matches!(
            self,
            RegistryError::BlobUnknown(_)
                | RegistryError::LayerUnknown { .. }
                | RegistryError::ManifestUnknown { .. }
                | RegistryError::UploadUnknown(_)
        )
    }
}

/// Translates a driver's `NotFound` into the registry's notion of absence.
pub(crate) trait StorageResultExt<T> {
    /// Replace a `NotFound` storage error with `unknown()`.
    fn or_unknown<F>(self, unknown: F) -> RegistryResult<T>
    where
        F: FnOnce() -> RegistryError;

    /// Treat `NotFound` as `None`.
    fn found(self) -> RegistryResult<Option<T>>;
}

impl<T> StorageResultExt<T> for Result<T, storage::StorageError> {
    fn or_unknown<F>(self, unknown: F) -> RegistryResult<T>
    where
        F: FnOnce() -> RegistryError,
    {
        match self {
            Ok(value) => Ok(value),
            Err(err) if err.is_not_found() => Err(unknown()),
            Err(err) => Err(err.into()),
        }
    }

    fn found(self) -> RegistryResult<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        let digest = Digest::sha256(b"x");
        assert_eq!(
            RegistryError::BlobUnknown(digest.clone()).error_code(),
            "BLOB_UNKNOWN"
        );
        assert_eq!(
            RegistryError::DigestMismatch {
                expected: digest.clone(),
                actual: Digest::sha256(b"y"),
            }
            .error_code(),
            "DIGEST_INVALID"
        );
        assert_eq!(
            RegistryError::from("a".parse::<RepositoryName>().unwrap_err()).error_code(),
            "NAME_INVALID"
        );
        assert!(RegistryError::UploadUnknown(Uuid::nil()).is_unknown());
        assert!(!RegistryError::LayerClosed.is_unknown());
    }
}
