//! Public configuration for the registry client and pull engine.

use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Default registry base URL (Docker Distribution v2).
pub const DEFAULT_REGISTRY: &str = "https://registry-1.docker.io";

/// Default downloads root.
pub const DEFAULT_OUTPUT_DIR: &str = "downloaded-models";

/// Configuration for pulls.
///
/// Use the builder pattern methods to customize the configuration.
///
/// # Example
///
/// ```
/// use modelpull_registry::RegistryConfig;
///
/// let config = RegistryConfig::new()
///     .with_platform("linux/arm64")
///     .with_concurrency(8);
/// ```
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Registry base URL.
    pub registry: Url,
    /// Platform selector for indices, `os/arch`.
    pub platform: String,
    /// Parallel blob downloads per pull.
    pub concurrency: usize,
    /// Retry attempts beyond the first.
    pub retries: u32,
    /// Overall per-request timeout; `None` disables it (the default).
    pub timeout: Option<Duration>,
    /// Skip TLS certificate verification (discouraged).
    pub insecure: bool,
    /// Preserve the staging directory after a successful archive.
    pub keep_staging: bool,
    /// Downloads root directory.
    pub output_dir: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            registry: Url::parse(DEFAULT_REGISTRY).expect("default registry URL is valid"),
            platform: format!("linux/{}", std::env::consts::ARCH),
            concurrency: 4,
            retries: 3,
            timeout: None,
            insecure: false,
            keep_staging: false,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

impl RegistryConfig {
    /// Create a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the registry base URL.
    #[must_use]
    pub fn with_registry(mut self, registry: Url) -> Self {
        self.registry = registry;
        self
    }

    /// Set the platform selector (e.g. `linux/arm64`).
    #[must_use]
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    /// Set the number of parallel blob downloads per pull.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the retry attempts beyond the first.
    #[must_use]
    pub const fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the overall request timeout; zero disables it.
    #[must_use]
    pub const fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = if secs == 0 {
            None
        } else {
            Some(Duration::from_secs(secs))
        };
        self
    }

    /// Skip TLS verification.
    #[must_use]
    pub const fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Preserve staging after a successful pull.
    #[must_use]
    pub const fn with_keep_staging(mut self, keep: bool) -> Self {
        self.keep_staging = keep;
        self
    }

    /// Set the downloads root.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Target `(os, architecture)` for index selection: the OS is pinned to
    /// `linux`, the architecture is the last segment of the platform string.
    #[must_use]
    pub fn selection_target(&self) -> (String, String) {
        let arch = self
            .platform
            .rsplit('/')
            .next()
            .unwrap_or(&self.platform)
            .to_string();
        ("linux".to_string(), arch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_cli_surface() {
        let config = RegistryConfig::new();
        assert_eq!(config.registry.as_str(), "https://registry-1.docker.io/");
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.retries, 3);
        assert!(config.timeout.is_none());
        assert!(!config.insecure);
        assert!(!config.keep_staging);
        assert_eq!(config.output_dir, PathBuf::from("downloaded-models"));
        assert!(config.platform.starts_with("linux/"));
    }

    #[test]
    fn zero_timeout_disables() {
        assert!(RegistryConfig::new().with_timeout_secs(0).timeout.is_none());
        assert_eq!(
            RegistryConfig::new().with_timeout_secs(45).timeout,
            Some(Duration::from_secs(45))
        );
    }

    #[test]
    fn selection_target_takes_last_platform_segment() {
        let config = RegistryConfig::new().with_platform("linux/arm64");
        assert_eq!(
            config.selection_target(),
            ("linux".to_string(), "arm64".to_string())
        );

        let bare = RegistryConfig::new().with_platform("amd64");
        assert_eq!(
            bare.selection_target(),
            ("linux".to_string(), "amd64".to_string())
        );
    }
}
