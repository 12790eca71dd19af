//! Mapping from registry objects to virtual storage paths.
//!
//! The layout beneath the root is:
//!
//! ```text
//! <root>
//! ├── blobs
//! │   └── <algorithm>/<first two hex>/<hex>/data
//! └── repositories
//!     └── <name>
//!         ├── _layers/<algorithm>/<hex>/link
//!         ├── _uploads/<uuid>/{data,startedat}
//!         └── _manifests
//!             ├── revisions/<algorithm>/<hex>/link
//!             └── tags/<tag>/current/link
//! ```
//!
//! Blob content is shared by every repository. A repository only sees a
//! blob through a link in its own namespace.

use camino::{Utf8Path, Utf8PathBuf};
use uuid::Uuid;

use crate::digest::Digest;
use crate::name::{RepositoryName, Tag};

/// Root used when none is configured.
pub const DEFAULT_ROOT: &str = "/docker/registry/v2";

/// A registry object whose storage location is needed.
#[derive(Debug, Clone, Copy)]
pub enum PathSpec<'a> {
    /// Content of a blob, shared between repositories.
    BlobData(&'a Digest),

    /// Link from a repository to a blob it may serve.
    LayerLink(&'a RepositoryName, &'a Digest),

    /// Directory holding everything for one upload.
    Upload(&'a RepositoryName, &'a Uuid),

    /// Bytes received so far for an upload.
    UploadData(&'a RepositoryName, &'a Uuid),

    /// Start time of an upload, which also marks the upload as existing.
    UploadStartedAt(&'a RepositoryName, &'a Uuid),

    /// Link from a repository to a manifest revision it holds.
    ManifestRevisionLink(&'a RepositoryName, &'a Digest),

    /// Directory holding one entry per tag of a repository.
    ManifestTags(&'a RepositoryName),

    /// Link from a tag to its current manifest digest.
    TagCurrentLink(&'a RepositoryName, &'a Tag),

    /// Top level directory of a repository.
    RepositoryRoot(&'a RepositoryName),

    /// Directory holding all repositories.
    Repositories,
}

/// Resolves [`PathSpec`]s to paths below a fixed root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathManager {
    root: Utf8PathBuf,
}

impl Default for PathManager {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT)
    }
}

impl PathManager {
    /// Create a path manager placing everything below `root`.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// The storage path for `spec`.
    pub fn path(&self, spec: PathSpec<'_>) -> Utf8PathBuf {
        match spec {
            PathSpec::BlobData(digest) => {
                let hex = digest.hex();
                self.root.join(format!(
                    "blobs/{}/{}/{}/data",
                    digest.algorithm(),
                    &hex[..2],
                    hex
                ))
            }
            PathSpec::LayerLink(name, digest) => self
                .repository(name)
                .join(format!("_layers/{}/{}/link", digest.algorithm(), digest.hex())),
            PathSpec::Upload(name, uuid) => self.repository(name).join(format!("_uploads/{uuid}")),
            PathSpec::UploadData(name, uuid) => self.path(PathSpec::Upload(name, uuid)).join("data"),
            PathSpec::UploadStartedAt(name, uuid) => {
                self.path(PathSpec::Upload(name, uuid)).join("startedat")
            }
            PathSpec::ManifestRevisionLink(name, digest) => self.repository(name).join(format!(
                "_manifests/revisions/{}/{}/link",
                digest.algorithm(),
                digest.hex()
            )),
            PathSpec::ManifestTags(name) => self.repository(name).join("_manifests/tags"),
            PathSpec::TagCurrentLink(name, tag) => self
                .path(PathSpec::ManifestTags(name))
                .join(format!("{tag}/current/link")),
            PathSpec::RepositoryRoot(name) => self.repository(name),
            PathSpec::Repositories => self.root.join("repositories"),
        }
    }

    fn repository(&self, name: &RepositoryName) -> Utf8PathBuf {
        self.root.join("repositories").join(name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest() -> Digest {
        "sha256:abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789"
            .parse()
            .unwrap()
    }

    fn name() -> RepositoryName {
        "library/ubuntu".parse().unwrap()
    }

    #[test]
    fn blob_paths_are_sharded() {
        let paths = PathManager::default();
        assert_eq!(
            paths.path(PathSpec::BlobData(&digest())).as_str(),
            "/docker/registry/v2/blobs/sha256/ab/abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789/data"
        );
    }

    #[test]
    fn repository_paths() {
        let paths = PathManager::new("/r");
        let name = name();
        let digest = digest();
        let uuid = Uuid::nil();
        let tag: Tag = "latest".parse().unwrap();

        assert_eq!(
            paths.path(PathSpec::LayerLink(&name, &digest)).as_str(),
            format!("/r/repositories/library/ubuntu/_layers/sha256/{}/link", digest.hex())
        );
        assert_eq!(
            paths.path(PathSpec::UploadData(&name, &uuid)).as_str(),
            "/r/repositories/library/ubuntu/_uploads/00000000-0000-0000-0000-000000000000/data"
        );
        assert_eq!(
            paths.path(PathSpec::UploadStartedAt(&name, &uuid)).as_str(),
            "/r/repositories/library/ubuntu/_uploads/00000000-0000-0000-0000-000000000000/startedat"
        );
        assert_eq!(
            paths
                .path(PathSpec::ManifestRevisionLink(&name, &digest))
                .as_str(),
            format!(
                "/r/repositories/library/ubuntu/_manifests/revisions/sha256/{}/link",
                digest.hex()
            )
        );
        assert_eq!(
            paths.path(PathSpec::TagCurrentLink(&name, &tag)).as_str(),
            "/r/repositories/library/ubuntu/_manifests/tags/latest/current/link"
        );
        assert_eq!(
            paths.path(PathSpec::RepositoryRoot(&name)).as_str(),
            "/r/repositories/library/ubuntu"
        );
    }

    #[test]
    fn kinds_do_not_collide() {
        let paths = PathManager::default();
        let name = name();
        let digest = digest();
        let uuid = Uuid::nil();
        let tag: Tag = "latest".parse().unwrap();

        let all = [
            paths.path(PathSpec::BlobData(&digest)),
            paths.path(PathSpec::LayerLink(&name, &digest)),
            paths.path(PathSpec::UploadData(&name, &uuid)),
            paths.path(PathSpec::UploadStartedAt(&name, &uuid)),
            paths.path(PathSpec::ManifestRevisionLink(&name, &digest)),
            paths.path(PathSpec::TagCurrentLink(&name, &tag)),
        ];
        let unique: std::collections::BTreeSet<_> = all.iter().collect();
        assert_eq!(unique.len(), all.len());
    }
}
