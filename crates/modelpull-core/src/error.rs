//! Pull error types.
//!
//! These errors are designed to be serializable and not depend on external
//! error types like `std::io::Error`. For I/O errors, we capture the kind
//! and message as strings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for pull operations.
///
/// Crosses the engine/manager/control-plane boundaries, so it carries only
/// owned strings rather than non-serializable source errors.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum PullError {
    /// I/O error during file operations.
    #[error("I/O error ({kind}): {message}")]
    Io {
        /// The kind of I/O error (e.g., "NotFound", "PermissionDenied").
        kind: String,
        /// Detailed error message.
        message: String,
    },

    /// Network/HTTP error talking to the registry.
    #[error("network error: {message}")]
    Network {
        /// Detailed error message.
        message: String,
        /// HTTP status code if available.
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
    },

    /// Auth challenge handling failed (bad realm, wrong scheme, empty token).
    #[error("auth failed: {message}")]
    Auth {
        /// Detailed error message.
        message: String,
    },

    /// The user-supplied reference could not be parsed.
    #[error("invalid reference '{value}': {message}")]
    InvalidReference {
        /// The offending input.
        value: String,
        /// What was wrong with it.
        message: String,
    },

    /// The registry returned something that is neither a manifest nor an index.
    #[error("unsupported manifest media type {media_type:?}: {body_prefix}")]
    UnsupportedManifest {
        /// The advertised Content-Type (parameters stripped).
        media_type: String,
        /// Up to 256 bytes of the response body, for diagnostics.
        body_prefix: String,
    },

    /// An index contained no manifest for the requested platform.
    #[error("no manifest for platform {os}/{architecture}")]
    NoPlatformMatch {
        /// Target OS.
        os: String,
        /// Target architecture.
        architecture: String,
    },

    /// Streamed blob hash did not match the expected digest.
    #[error("sha256 mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Expected hex digest.
        expected: String,
        /// Actual hex digest of the received bytes.
        actual: String,
    },

    /// A manager action referenced an unknown task.
    #[error("task not found: {id}")]
    TaskNotFound {
        /// The task id that was not found.
        id: u64,
    },

    /// A manager action is not legal from the task's current state.
    #[error("cannot {action} a task in state '{state}'")]
    IllegalTransition {
        /// The attempted action.
        action: String,
        /// The state the task was in.
        state: String,
    },

    /// The pull was cancelled (pause or cancel).
    #[error("pull canceled")]
    Canceled,

    /// General/uncategorized error.
    #[error("{message}")]
    Other {
        /// Error message.
        message: String,
    },
}

impl PullError {
    /// Create an I/O error from a `std::io::Error`.
    #[must_use]
    pub fn from_io_error(err: &std::io::Error) -> Self {
        let kind = err.kind();
        Self::Io {
            kind: format!("{kind:?}"),
            message: err.to_string(),
        }
    }

    /// Create a network error without a status code.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            status_code: None,
        }
    }

    /// Create a network error with an HTTP status code.
    pub fn network_with_status(message: impl Into<String>, status_code: u16) -> Self {
        Self::Network {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    /// Create an auth error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create an invalid-reference error.
    pub fn invalid_reference(value: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidReference {
            value: value.into(),
            message: message.into(),
        }
    }

    /// Create a generic error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Check if this is a cancellation.
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

impl From<std::io::Error> for PullError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io_error(&err)
    }
}

/// Convenience result type for pull operations.
pub type PullResult<T> = Result<T, PullError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_captures_kind() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such blob");
        let err = PullError::from_io_error(&io_err);

        match err {
            PullError::Io { kind, message } => {
                assert_eq!(kind, "NotFound");
                assert!(message.contains("no such blob"));
            }
            _ => panic!("expected Io variant"),
        }
    }

    #[test]
    fn error_round_trips_through_json() {
        let err = PullError::network_with_status("registry unavailable", 503);
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("503"));

        let parsed: PullError = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, err);
    }

    #[test]
    fn canceled_is_detected() {
        assert!(PullError::Canceled.is_canceled());
        assert!(!PullError::network("timeout").is_canceled());
    }

    #[test]
    fn digest_mismatch_message_names_both_hashes() {
        let err = PullError::DigestMismatch {
            expected: "aa".repeat(32),
            actual: "bb".repeat(32),
        };
        let msg = err.to_string();
        assert!(msg.contains(&"aa".repeat(32)));
        assert!(msg.contains(&"bb".repeat(32)));
    }
}
