//! Core domain types for modelpull.
//!
//! Pure data types and on-disk session state shared by the registry adapter,
//! the download manager, and the control plane. No network I/O lives here.

pub mod error;
pub mod manifest;
pub mod progress;
pub mod reference;
pub mod session;
pub mod staging;
pub mod task;

pub use error::{PullError, PullResult};
pub use manifest::{
    BlobItem, Descriptor, ImageIndex, ImageManifest, IndexEntry, Platform, MANIFEST_ACCEPT,
};
pub use progress::{ProgressCounter, ProgressSnapshot, RateSampler};
pub use reference::Reference;
pub use session::{sanitize_model_name, state as session_state, SessionMetadata};
pub use staging::StagingLayout;
pub use task::{TaskSnapshot, TaskState};
