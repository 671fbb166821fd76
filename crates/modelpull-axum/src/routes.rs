//! Route definitions and router construction.

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use modelpull_download::DownloadManager;

use crate::handlers;
use crate::state::{AppContext, AppState};

/// Build the control-plane router.
///
/// The downloads directory is created if absent; finished archives are
/// served from it by name.
///
/// # Path Parameter Syntax
/// Axum 0.8 uses brace syntax for path parameters: `{name}`
pub fn create_router(manager: Arc<DownloadManager>) -> Router {
    let downloads_dir = manager.output_dir().clone();
    if let Err(err) = std::fs::create_dir_all(&downloads_dir) {
        tracing::warn!(dir = %downloads_dir.display(), error = %err, "cannot create downloads dir");
    }

    let state: AppState = Arc::new(AppContext {
        manager,
        downloads_dir,
    });

    Router::new()
        .route("/", get(handlers::index))
        .route("/queue/add", post(handlers::queue_add))
        .route("/queue/action", post(handlers::queue_action))
        .route("/download/{name}", get(handlers::download))
        .route("/progress", get(handlers::progress))
        .with_state(state)
}
