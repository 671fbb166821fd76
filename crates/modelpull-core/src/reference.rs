//! Artifact reference parsing.
//!
//! A reference is the user-facing identifier for a registry artifact:
//! `name[:tag]`, `owner/name[:tag]`, or `name@sha256:<hex>`. Single-segment
//! repositories are namespaced under `library/`, mirroring Distribution
//! conventions.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::error::{PullError, PullResult};

/// Default namespace for single-segment repository names.
pub const DEFAULT_NAMESPACE: &str = "library";

/// Default tag when the reference carries neither tag nor digest.
pub const DEFAULT_TAG: &str = "latest";

/// A normalized registry reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Registry host (taken from the configured registry base URL).
    pub host: String,
    /// Repository path, always containing at least one `/`.
    pub repository: String,
    /// Either a tag or `sha256:<64-hex>`.
    pub reference: String,
    /// True when `reference` is a digest.
    pub is_digest: bool,
}

impl Reference {
    /// Parse a user-supplied reference against a registry base URL.
    ///
    /// Parse order: digest split first (`@sha256:`), then tag split (`:`),
    /// then the `latest` default. The repository gains a `library/` prefix
    /// when it has no namespace of its own.
    pub fn parse(input: &str, registry: &Url) -> PullResult<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(PullError::invalid_reference(input, "empty reference"));
        }

        let host = registry
            .host_str()
            .ok_or_else(|| {
                PullError::invalid_reference(registry.as_str(), "registry URL has no host")
            })?
            .to_string();

        let (repo_part, reference, is_digest) = if let Some((lhs, hex)) =
            input.split_once("@sha256:")
        {
            if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(PullError::invalid_reference(
                    input,
                    "digest must be sha256:<64 hex chars>",
                ));
            }
            (lhs, format!("sha256:{hex}"), true)
        } else if let Some((lhs, tag)) = input.split_once(':') {
            if tag.is_empty() {
                return Err(PullError::invalid_reference(input, "empty tag"));
            }
            (lhs, tag.to_string(), false)
        } else {
            (input, DEFAULT_TAG.to_string(), false)
        };

        if repo_part.is_empty() {
            return Err(PullError::invalid_reference(input, "empty repository"));
        }

        let repository = if repo_part.contains('/') {
            repo_part.to_string()
        } else {
            format!("{DEFAULT_NAMESPACE}/{repo_part}")
        };

        Ok(Self {
            host,
            repository,
            reference,
            is_digest,
        })
    }

    /// Filename tail for the stored manifest: the raw tag, or the digest with
    /// its colon mapped to a dash.
    #[must_use]
    pub fn manifest_tail(&self) -> String {
        if self.is_digest {
            self.reference.replace(':', "-")
        } else {
            self.reference.clone()
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_digest {
            write!(f, "{}@{}", self.repository, self.reference)
        } else {
            write!(f, "{}:{}", self.repository, self.reference)
        }
    }
}
