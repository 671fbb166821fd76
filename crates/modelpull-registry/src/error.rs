//! Internal error types for registry operations.
//!
//! These errors are internal to `modelpull-registry` and are mapped to
//! [`PullError`] at the crate boundary.

use modelpull_core::PullError;
use thiserror::Error;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors raised while talking to a registry or staging its content.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Request failed with a non-success HTTP status.
    #[error("registry request failed with status {status}: {url}")]
    RequestFailed {
        /// HTTP status code.
        status: u16,
        /// The URL that was requested.
        url: String,
    },

    /// Auth challenge handling failed.
    #[error("auth: {message}")]
    Auth {
        /// What went wrong (missing header, bad scheme, empty token, ...).
        message: String,
    },

    /// Response is neither a manifest nor an index.
    #[error("unsupported manifest media type {media_type:?}: {body_prefix}")]
    UnsupportedManifest {
        /// Advertised Content-Type with parameters stripped.
        media_type: String,
        /// Up to 256 bytes of the body for diagnostics.
        body_prefix: String,
    },

    /// An index had no entry for the target platform.
    #[error("no manifest for platform {os}/{architecture}")]
    NoPlatformMatch { os: String, architecture: String },

    /// Streamed blob hash did not match its digest.
    #[error("sha256 mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// A digest string did not have the `sha256:<64-hex>` shape.
    #[error("malformed digest: {digest}")]
    MalformedDigest { digest: String },

    /// The operation was canceled.
    #[error("canceled")]
    Canceled,

    /// Network or HTTP client error.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON parsing error.
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Filesystem error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Archive packaging error.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl From<RegistryError> for PullError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::RequestFailed { status, url } => {
                Self::network_with_status(format!("request failed: {url}"), status)
            }
            RegistryError::Auth { message } => Self::Auth { message },
            RegistryError::UnsupportedManifest {
                media_type,
                body_prefix,
            } => Self::UnsupportedManifest {
                media_type,
                body_prefix,
            },
            RegistryError::NoPlatformMatch { os, architecture } => {
                Self::NoPlatformMatch { os, architecture }
            }
            RegistryError::DigestMismatch { expected, actual } => {
                Self::DigestMismatch { expected, actual }
            }
            RegistryError::MalformedDigest { digest } => {
                Self::other(format!("malformed digest: {digest}"))
            }
            RegistryError::Canceled => Self::Canceled,
            RegistryError::Network(e) => Self::network(e.to_string()),
            RegistryError::InvalidUrl(e) => Self::other(format!("invalid URL: {e}")),
            RegistryError::JsonParse(e) => Self::other(format!("JSON parse: {e}")),
            RegistryError::Io(e) => Self::from_io_error(&e),
            RegistryError::Archive(e) => Self::other(format!("archive: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_failure_maps_to_network_with_status() {
        let err = RegistryError::RequestFailed {
            status: 503,
            url: "https://registry.example/v2/m/manifests/latest".to_string(),
        };
        match PullError::from(err) {
            PullError::Network { status_code, .. } => assert_eq!(status_code, Some(503)),
            other => panic!("unexpected mapping: {other:?}"),
        }
    }

    #[test]
    fn canceled_maps_to_canceled() {
        assert!(PullError::from(RegistryError::Canceled).is_canceled());
    }

    #[test]
    fn digest_mismatch_preserves_hashes() {
        let err = RegistryError::DigestMismatch {
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        };
        match PullError::from(err) {
            PullError::DigestMismatch { expected, actual } => {
                assert_eq!(expected, "aa");
                assert_eq!(actual, "bb");
            }
            other => panic!("unexpected mapping: {other:?}"),
        }
    }
}
