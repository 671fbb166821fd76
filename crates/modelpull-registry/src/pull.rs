//! The pull engine: one reference, end to end.
//!
//! reference → token → manifest (persisted) → blob enumeration → session
//! write → pre-accounting → bounded-parallel blob fetch → archive → cleanup.
//! Partial progress always stays on disk; only a fully successful pull
//! removes its staging directory (unless configured to keep it).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use modelpull_core::session::{self, state as session_state};
use modelpull_core::staging::digest_hex;
use modelpull_core::{
    sanitize_model_name, BlobItem, ProgressCounter, PullError, Reference, StagingLayout,
};

use crate::auth;
use crate::blob;
use crate::config::RegistryConfig;
use crate::error::{RegistryError, RegistryResult};
use crate::resolver;
use crate::transport::{ReqwestTransport, RetryingTransport, Transport};

/// Everything the engine needs to run one pull.
#[derive(Clone)]
pub struct PullRequest {
    /// Original user reference.
    pub model: String,
    /// Staging directory for this pull.
    pub staging_root: PathBuf,
    /// Target archive path.
    pub out_zip: PathBuf,
    /// Shared progress counter (fresh per pull).
    pub progress: Arc<ProgressCounter>,
    /// Cancellation handle (pause and cancel both trip it).
    pub cancel: CancellationToken,
}

/// Seam between the download manager and the engine.
#[async_trait]
pub trait PullRunner: Send + Sync {
    /// Run one pull to completion.
    async fn run(&self, request: PullRequest) -> Result<(), PullError>;
}

/// Drives pulls against one registry with one shared transport.
pub struct PullEngine {
    transport: Arc<dyn Transport>,
    config: RegistryConfig,
}

impl PullEngine {
    /// Production engine: retrying reqwest transport per the configuration.
    pub fn new(config: RegistryConfig) -> RegistryResult<Self> {
        let transport = RetryingTransport::new(ReqwestTransport::new(&config)?, config.retries);
        Ok(Self {
            transport: Arc::new(transport),
            config,
        })
    }

    /// Engine over an injected transport (tests).
    pub fn with_transport(config: RegistryConfig, transport: Arc<dyn Transport>) -> Self {
        Self { transport, config }
    }

    /// The engine's configuration.
    #[must_use]
    pub const fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Run one pull. On failure (other than cancellation) the session file is
    /// annotated with `state="error"` before the error is returned.
    pub async fn pull(&self, request: &PullRequest) -> Result<(), PullError> {
        let reference = match Reference::parse(&request.model, &self.config.registry) {
            Ok(reference) => reference,
            Err(err) => {
                self.annotate_error(request, &err);
                return Err(err);
            }
        };

        match self.pull_inner(request, &reference).await {
            Ok(()) => Ok(()),
            Err(RegistryError::Canceled) => Err(PullError::Canceled),
            Err(err) => {
                let pull_err = PullError::from(err);
                tracing::warn!(model = %request.model, error = %pull_err, "pull failed");
                self.annotate_error(request, &pull_err);
                Err(pull_err)
            }
        }
    }

    async fn pull_inner(&self, request: &PullRequest, reference: &Reference) -> RegistryResult<()> {
        let cancel = &request.cancel;
        let layout = StagingLayout::new(&request.staging_root);

        tracing::info!(
            reference = %reference,
            staging = %layout.root().display(),
            "starting pull"
        );
        layout.ensure_dirs()?;

        // Token first, reused for every registry call in this pull.
        let token = cancellable(cancel, async {
            auth::resolve_token(
                self.transport.as_ref(),
                &self.config.registry,
                &reference.repository,
                &reference.reference,
            )
            .await
        })
        .await??;

        // Resolve and persist the manifest.
        let resolved = cancellable(cancel, async {
            resolver::resolve_manifest(
                self.transport.as_ref(),
                &self.config.registry,
                &reference.repository,
                &reference.reference,
                &token,
                &self.config.platform,
            )
            .await
        })
        .await??;

        let tail = resolved
            .digest
            .as_deref()
            .map_or_else(|| reference.manifest_tail(), |d| d.replace(':', "-"));
        let manifest_path = layout.manifest_path(&reference.host, &reference.repository, &tail);
        if let Some(parent) = manifest_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&manifest_path, &resolved.raw).await?;

        let blobs = resolved.manifest.blob_items();
        tracing::debug!(count = blobs.len(), "enumerated blobs");

        // Session: overlay current parameters, preserving identity fields.
        self.write_session(request, session_state::DOWNLOADING, "downloading");

        // Pre-account bytes already on disk from earlier attempts.
        let total: u64 = blobs.iter().map(|b| b.size).sum();
        request.progress.set_total(total);
        request.progress.set_done(existing_bytes(&layout, &blobs).await);

        self.fetch_blobs(request, &layout, &reference.repository, &token, blobs)
            .await?;

        // Package, then clean up staging on success.
        let staging_root = request.staging_root.clone();
        let out_zip = request.out_zip.clone();
        cancellable(cancel, async move {
            tokio::task::spawn_blocking(move || crate::archive::pack_staging(&staging_root, &out_zip))
                .await
                .map_err(|e| RegistryError::Io(std::io::Error::other(e)))?
        })
        .await??;

        if self.config.keep_staging {
            self.write_session(request, session_state::NONE, "completed");
        } else {
            tokio::fs::remove_dir_all(&request.staging_root).await?;
        }

        tracing::info!(archive = %request.out_zip.display(), "pull complete");
        Ok(())
    }

    /// Bounded-parallel blob fetch. Every worker runs to completion (or
    /// cancellation); the first non-cancellation error wins.
    async fn fetch_blobs(
        &self,
        request: &PullRequest,
        layout: &StagingLayout,
        repository: &str,
        token: &str,
        blobs: Vec<BlobItem>,
    ) -> RegistryResult<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut workers: JoinSet<RegistryResult<()>> = JoinSet::new();

        for item in blobs {
            let transport = Arc::clone(&self.transport);
            let registry = self.config.registry.clone();
            let repository = repository.to_string();
            let token = token.to_string();
            let layout = layout.clone();
            let progress = Arc::clone(&request.progress);
            let cancel = request.cancel.clone();
            let semaphore = Arc::clone(&semaphore);

            workers.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| RegistryError::Canceled)?;
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(RegistryError::Canceled),
                    result = blob::download_blob(
                        transport.as_ref(),
                        &registry,
                        &repository,
                        &item.digest,
                        &token,
                        &layout,
                        item.size,
                        Some(progress.as_ref()),
                    ) => result,
                }
            });
        }

        let mut first_error: Option<RegistryError> = None;
        let mut canceled = false;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(RegistryError::Canceled)) => canceled = true,
                Ok(Err(err)) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(join_err) => {
                    if first_error.is_none() {
                        first_error = Some(RegistryError::Io(std::io::Error::other(join_err)));
                    }
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        if canceled {
            return Err(RegistryError::Canceled);
        }
        Ok(())
    }

    /// Load-overlay-save the session file for this pull.
    fn write_session(&self, request: &PullRequest, state: &str, message: &str) {
        let mut meta = session::load_session(&request.staging_root).unwrap_or_default();
        if meta.session_id.is_empty() {
            meta.session_id = sanitize_model_name(&request.model);
        }
        if meta.model.is_empty() {
            meta.model = request.model.clone();
        }
        if meta.started_at.is_empty() {
            meta.started_at = Utc::now().to_rfc3339();
        }
        meta.out_zip = request.out_zip.display().to_string();
        meta.staging_root = request.staging_root.display().to_string();
        meta.registry = self.config.registry.to_string();
        meta.platform = self.config.platform.clone();
        meta.concurrency = self.config.concurrency;
        meta.retries = self.config.retries;
        meta.state = state.to_string();
        meta.message = message.to_string();
        meta.touch();

        if let Err(err) = session::save_session(&request.staging_root, &meta) {
            tracing::warn!(error = %err, "failed to write session file");
        }
    }

    fn annotate_error(&self, request: &PullRequest, err: &PullError) {
        self.write_session(request, session_state::ERROR, &err.to_string());
    }
}

#[async_trait]
impl PullRunner for PullEngine {
    async fn run(&self, request: PullRequest) -> Result<(), PullError> {
        self.pull(&request).await
    }
}

/// Race a future against the pull's cancellation handle.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = T>,
) -> RegistryResult<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(RegistryError::Canceled),
        value = fut => Ok(value),
    }
}

/// Sum bytes already on disk for the given blobs, clamped per-blob to the
/// expected size when known.
async fn existing_bytes(layout: &StagingLayout, blobs: &[BlobItem]) -> u64 {
    let mut sum = 0u64;
    for item in blobs {
        let Some(hex) = digest_hex(&item.digest) else {
            continue;
        };
        for path in [layout.blob_path(hex), layout.blob_part_path(hex)] {
            if let Ok(meta) = tokio::fs::metadata(&path).await {
                let len = if item.size > 0 {
                    meta.len().min(item.size)
                } else {
                    meta.len()
                };
                sum += len;
            }
        }
    }
    sum
}
