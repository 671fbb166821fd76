//! Download manager: a task queue with a single worker loop.
//!
//! User actions (enqueue, pause, resume, cancel) mediate against running
//! pulls through a per-task cancellation handle. One pull runs at a time;
//! blob-level parallelism lives inside the pull engine.

mod manager;

pub use manager::DownloadManager;
pub use modelpull_registry::{PullRequest, PullRunner};
