//! OCI / Docker Distribution manifest and index types.
//!
//! The wire shapes follow the Distribution v2 JSON documents. An index is a
//! list of platform-specific manifest descriptors; selection against a target
//! platform is deterministic (case-insensitive match, lexicographically
//! smallest digest on ties).

use serde::{Deserialize, Serialize};

/// OCI image index media type.
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
/// OCI image manifest media type.
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// Docker manifest list media type.
pub const MEDIA_TYPE_DOCKER_INDEX: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
/// Docker image manifest media type.
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str =
    "application/vnd.docker.distribution.manifest.v2+json";

/// The `Accept` header value sent on every manifest request.
pub const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.index.v1+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.docker.distribution.manifest.v2+json";

/// Check whether a (parameter-stripped) media type is an image manifest.
#[must_use]
pub fn is_manifest_type(media_type: &str) -> bool {
    media_type == MEDIA_TYPE_OCI_MANIFEST || media_type == MEDIA_TYPE_DOCKER_MANIFEST
}

/// Check whether a (parameter-stripped) media type is an index.
#[must_use]
pub fn is_index_type(media_type: &str) -> bool {
    media_type == MEDIA_TYPE_OCI_INDEX || media_type == MEDIA_TYPE_DOCKER_INDEX
}

/// A content descriptor: media type, digest, size.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType", default)]
    pub media_type: String,
    #[serde(default)]
    pub digest: String,
    /// Size in bytes; zero means unknown.
    #[serde(default)]
    pub size: u64,
}

/// A flat image manifest: one config descriptor plus ordered layers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManifest {
    #[serde(default)]
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

impl ImageManifest {
    /// True when the document plausibly is a manifest (used by the resolver's
    /// auto-detect fallback).
    #[must_use]
    pub fn looks_like_manifest(&self) -> bool {
        !self.config.digest.is_empty() || !self.layers.is_empty()
    }

    /// Enumerate blobs as `[config] ++ layers`, deduplicated by digest.
    /// First-observed size wins when descriptors disagree.
    #[must_use]
    pub fn blob_items(&self) -> Vec<BlobItem> {
        let mut seen = std::collections::HashSet::new();
        let mut items = Vec::with_capacity(self.layers.len() + 1);
        for desc in std::iter::once(&self.config).chain(self.layers.iter()) {
            if desc.digest.is_empty() {
                continue;
            }
            if seen.insert(desc.digest.clone()) {
                items.push(BlobItem {
                    digest: desc.digest.clone(),
                    size: desc.size,
                });
            }
        }
        items
    }
}

/// Target platform of an index entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub architecture: String,
}

/// One entry of an image index.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub platform: Option<Platform>,
}

/// An image index (a.k.a. manifest list).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageIndex {
    #[serde(default)]
    pub manifests: Vec<IndexEntry>,
}

impl ImageIndex {
    /// Select the manifest digest for `(os, architecture)`.
    ///
    /// Both fields match case-insensitively; when several entries match, the
    /// lexicographically smallest digest is chosen so selection is stable
    /// across index orderings.
    #[must_use]
    pub fn select(&self, os: &str, architecture: &str) -> Option<&str> {
        self.manifests
            .iter()
            .filter(|entry| {
                entry.platform.as_ref().is_some_and(|p| {
                    p.os.eq_ignore_ascii_case(os)
                        && p.architecture.eq_ignore_ascii_case(architecture)
                })
            })
            .map(|entry| entry.digest.as_str())
            .filter(|digest| !digest.is_empty())
            .min()
    }
}

/// A blob to fetch: digest plus expected size (zero = unknown).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobItem {
    pub digest: String,
    pub size: u64,
}
