//! On-disk staging layout for one pull.
//!
//! ```text
//! <staging_root>/
//!   session.json
//!   models/
//!     manifests/<host>/<repo>/<tagOrSha256Dashed>
//!     blobs/sha256-<hex>           (final)
//!     blobs/sha256-<hex>.part      (in-progress)
//! ```

use std::path::{Path, PathBuf};

/// Suffix of in-progress blob files.
pub const PART_SUFFIX: &str = ".part";

/// Strip the `sha256:` prefix from a digest, validating the shape.
#[must_use]
pub fn digest_hex(digest: &str) -> Option<&str> {
    let hex = digest.strip_prefix("sha256:")?;
    (hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit())).then_some(hex)
}

/// Pure path arithmetic for a staging directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagingLayout {
    root: PathBuf,
}

impl StagingLayout {
    /// Wrap a staging root path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The staging root itself.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/session.json`.
    #[must_use]
    pub fn session_path(&self) -> PathBuf {
        self.root.join(crate::session::SESSION_FILE)
    }

    /// `<root>/models`, the subtree that gets archived.
    #[must_use]
    pub fn models_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    /// `<root>/models/blobs`.
    #[must_use]
    pub fn blobs_dir(&self) -> PathBuf {
        self.models_dir().join("blobs")
    }

    /// Final path of a blob, from its bare hex digest.
    #[must_use]
    pub fn blob_path(&self, hex: &str) -> PathBuf {
        self.blobs_dir().join(format!("sha256-{hex}"))
    }

    /// In-progress path of a blob, from its bare hex digest.
    #[must_use]
    pub fn blob_part_path(&self, hex: &str) -> PathBuf {
        self.blobs_dir().join(format!("sha256-{hex}{PART_SUFFIX}"))
    }

    /// Stored manifest path for `(host, repo, tail)` where `tail` is the tag
    /// or `sha256-<hex>`.
    #[must_use]
    pub fn manifest_path(&self, host: &str, repository: &str, tail: &str) -> PathBuf {
        self.models_dir()
            .join("manifests")
            .join(host)
            .join(repository)
            .join(tail)
    }

    /// Create the blob and manifest directories.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.blobs_dir())?;
        std::fs::create_dir_all(self.models_dir().join("manifests"))?;
        Ok(())
    }
}
