//! Command-line surface.

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use modelpull_registry::config::{DEFAULT_OUTPUT_DIR, DEFAULT_REGISTRY};
use modelpull_registry::RegistryConfig;

fn default_platform() -> String {
    format!("linux/{}", std::env::consts::ARCH)
}

/// Pull model-weight artifacts from an OCI registry into zip archives.
#[derive(Debug, Parser)]
#[command(name = "modelpull", version, about)]
pub struct Cli {
    /// Registry base URL.
    #[arg(long, default_value = DEFAULT_REGISTRY)]
    pub registry: String,

    /// Platform to select from multi-platform indices (os/arch).
    #[arg(long, default_value_t = default_platform())]
    pub platform: String,

    /// Parallel blob downloads per pull.
    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,

    /// Retry attempts beyond the first for transient failures.
    #[arg(long, default_value_t = 3)]
    pub retries: u32,

    /// Overall request timeout in seconds (0 disables).
    #[arg(long, default_value_t = 0)]
    pub timeout: u64,

    /// Skip TLS certificate verification (discouraged).
    #[arg(long)]
    pub insecure: bool,

    /// Preserve the staging directory after the archive is written.
    #[arg(long = "keep-staging")]
    pub keep_staging: bool,

    /// Downloads root directory.
    #[arg(long = "output-dir", default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,

    /// Output archive path (default: <output-dir>/<session-id>.zip).
    #[arg(short = 'o')]
    pub output: Option<PathBuf>,

    /// HTTP port for web-server mode (0 picks an ephemeral port).
    #[arg(long, default_value_t = 0)]
    pub port: u16,

    /// Verbose logging.
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Reference to pull (`name[:tag]`, `owner/name[:tag]`,
    /// `name@sha256:<hex>`). Omit to start the web server.
    pub reference: Option<String>,
}

impl Cli {
    /// Turn the flag surface into an engine configuration.
    pub fn registry_config(&self) -> anyhow::Result<RegistryConfig> {
        let registry = Url::parse(&self.registry)
            .map_err(|e| anyhow::anyhow!("invalid registry URL {:?}: {e}", self.registry))?;

        Ok(RegistryConfig::new()
            .with_registry(registry)
            .with_platform(&self.platform)
            .with_concurrency(self.concurrency)
            .with_retries(self.retries)
            .with_timeout_secs(self.timeout)
            .with_insecure(self.insecure)
            .with_keep_staging(self.keep_staging)
            .with_output_dir(&self.output_dir))
    }
}
