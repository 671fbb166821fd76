//! Axum control plane for the download manager.
//!
//! A small same-origin surface: a status page, two form-POST queue
//! endpoints that redirect back with a human-readable message, archive
//! serving, and a JSON progress snapshot.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::HttpError;
pub use routes::create_router;
pub use state::{AppContext, AppState};
