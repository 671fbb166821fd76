//! Process bootstrap: logging.

use tracing_subscriber::EnvFilter;

/// Initialize tracing with an env-filter. `RUST_LOG` wins when set;
/// otherwise `-v` raises the default level to debug.
pub fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
