//! Persisted per-pull session state.
//!
//! Each staging directory carries a `session.json` describing the pull that
//! owns it: the original user input, the pull parameters needed to resume,
//! and a coarse state string. The file is rewritten in full on every update
//! (best-effort, not crash-atomic); readers treat a missing or malformed file
//! as a brand-new session.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::PullResult;

/// File name of the session metadata inside a staging directory.
pub const SESSION_FILE: &str = "session.json";

/// Suffix that marks a directory as a pull staging area (the discovery
/// predicate for session recovery).
pub const STAGING_SUFFIX: &str = ".staging";

/// Session state strings as stored in `session.json`.
pub mod state {
    /// A pull is (or was) actively downloading.
    pub const DOWNLOADING: &str = "downloading";
    /// The pull was paused by the user.
    pub const PAUSED: &str = "paused";
    /// The pull failed; `message` carries the error.
    pub const ERROR: &str = "error";
    /// No particular state (fresh, canceled, or completed-with-staging).
    pub const NONE: &str = "";
}

/// Metadata persisted per staging directory.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionMetadata {
    /// Original user input (e.g. `owner/model:tag`).
    pub model: String,
    /// Filesystem-safe derivative of `model`.
    pub session_id: String,
    /// Absolute path of the target archive.
    pub out_zip: String,
    /// Absolute path of the staging directory.
    pub staging_root: String,
    /// Registry base URL used for this pull.
    pub registry: String,
    /// Platform selector (e.g. `linux/amd64`).
    pub platform: String,
    /// Parallel blobs per pull.
    pub concurrency: usize,
    /// Retry attempts beyond the first.
    pub retries: u32,
    /// RFC 3339 timestamp of session creation.
    pub started_at: String,
    /// RFC 3339 timestamp of the last metadata write.
    pub last_updated: String,
    /// One of the [`state`] strings.
    pub state: String,
    /// Short human-readable status.
    pub message: String,
}

impl SessionMetadata {
    /// Update the `last_updated` stamp to now.
    pub fn touch(&mut self) {
        self.last_updated = Utc::now().to_rfc3339();
    }
}

/// Derive a filesystem-safe session id from a model reference.
///
/// Lowercases, trims, and maps separator characters to `-`; an input that
/// reduces to nothing falls back to the literal `"model"`.
#[must_use]
pub fn sanitize_model_name(input: &str) -> String {
    let sanitized: String = input
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            '/' | ':' | '@' | '\\' | ' ' => '-',
            other => other,
        })
        .collect();

    if sanitized.is_empty() {
        "model".to_string()
    } else {
        sanitized
    }
}

/// Load the session file from a staging directory.
///
/// Missing or malformed files yield `None`; the caller starts fresh.
#[must_use]
pub fn load_session(staging_root: &Path) -> Option<SessionMetadata> {
    let path = staging_root.join(SESSION_FILE);
    let raw = fs::read(&path).ok()?;
    match serde_json::from_slice(&raw) {
        Ok(meta) => Some(meta),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "discarding malformed session file"
            );
            None
        }
    }
}

/// Write the session file, replacing any previous content.
pub fn save_session(staging_root: &Path, meta: &SessionMetadata) -> PullResult<()> {
    fs::create_dir_all(staging_root)?;
    let json = serde_json::to_vec_pretty(meta)
        .map_err(|e| crate::error::PullError::other(format!("encode session: {e}")))?;
    fs::write(staging_root.join(SESSION_FILE), json)?;
    Ok(())
}

/// Discover existing staging directories under a downloads root.
///
/// Returns `(staging_root, metadata)` pairs for every `*.staging` directory
/// whose session file parses; directories without a readable session are
/// skipped (they will be treated as new sessions if re-pulled).
#[must_use]
pub fn discover_sessions(root: &Path) -> Vec<(PathBuf, SessionMetadata)> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };

    let mut found: Vec<(PathBuf, SessionMetadata)> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(STAGING_SUFFIX))
        })
        .filter_map(|path| load_session(&path).map(|meta| (path, meta)))
        .collect();

    found.sort_by(|a, b| a.0.cmp(&b.0));
    found
}
