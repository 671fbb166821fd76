//! Shared state for the control plane.

use std::path::PathBuf;
use std::sync::Arc;

use modelpull_download::DownloadManager;

/// Context shared by all handlers.
pub struct AppContext {
    /// The download manager driving pulls.
    pub manager: Arc<DownloadManager>,
    /// Directory finished archives are served from.
    pub downloads_dir: PathBuf,
}

/// Handler state alias.
pub type AppState = Arc<AppContext>;
