//! CLI entry point - the composition root.
//!
//! With a positional reference: one pull, a progress bar, exit 0/1. Without:
//! the download manager plus the embedded control plane.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use modelpull_cli::{bootstrap, Cli};
use modelpull_core::{sanitize_model_name, ProgressCounter, RateSampler};
use modelpull_download::DownloadManager;
use modelpull_registry::{PullEngine, PullRequest};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    bootstrap::init_tracing(cli.verbose);

    let config = cli.registry_config()?;
    match cli.reference.clone() {
        Some(reference) => run_pull(&cli, config, &reference).await,
        None => run_server(cli.port, config).await,
    }
}

/// One-shot pull mode.
async fn run_pull(
    cli: &Cli,
    config: modelpull_registry::RegistryConfig,
    reference: &str,
) -> anyhow::Result<()> {
    let sanitized = sanitize_model_name(reference);
    let output_dir = config.output_dir.clone();
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("creating output dir {}", output_dir.display()))?;

    let staging_root = output_dir.join(format!("{sanitized}.staging"));
    let out_zip: PathBuf = cli
        .output
        .clone()
        .unwrap_or_else(|| output_dir.join(format!("{sanitized}.zip")));

    let engine = PullEngine::new(config).context("building registry client")?;
    let request = PullRequest {
        model: reference.to_string(),
        staging_root,
        out_zip: out_zip.clone(),
        progress: Arc::new(ProgressCounter::new()),
        cancel: CancellationToken::new(),
    };

    // Ctrl-C trips the pull's cancellation handle; staging stays on disk.
    let cancel = request.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, canceling pull");
            cancel.cancel();
        }
    });

    let ticker = spawn_progress_ticker(Arc::clone(&request.progress), request.cancel.clone());
    let result = engine.pull(&request).await;
    request.cancel.cancel();
    let _ = ticker.await;

    match result {
        Ok(()) => {
            println!("wrote {}", out_zip.display());
            Ok(())
        }
        Err(err) => Err(anyhow::anyhow!("pull failed: {err}")),
    }
}

/// Render a single-line progress display every 200ms while a total is known.
fn spawn_progress_ticker(
    progress: Arc<ProgressCounter>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(200));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut bar: Option<ProgressBar> = None;
        let mut sampler = RateSampler::default();

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = tick.tick() => {}
            }

            let snapshot = progress.snapshot();
            if snapshot.total == 0 {
                // Unknown total: rate display is suppressed.
                continue;
            }

            sampler.observe(snapshot.done);
            let bar = bar.get_or_insert_with(|| {
                let bar = ProgressBar::new(snapshot.total);
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template(
                            "{bar:40.cyan/blue} {bytes}/{total_bytes} {msg}",
                        )
                        .expect("progress template is valid")
                        .progress_chars("█▓░"),
                );
                bar
            });
            bar.set_position(snapshot.done);
            bar.set_message(match sampler.eta(snapshot.done, snapshot.total) {
                Some(eta) => format!("eta {}s", eta.as_secs()),
                None => String::new(),
            });
        }

        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
    })
}

/// Web-server mode: manager, session recovery, control plane.
async fn run_server(port: u16, config: modelpull_registry::RegistryConfig) -> anyhow::Result<()> {
    let output_dir = config.output_dir.clone();
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("creating output dir {}", output_dir.display()))?;

    let engine = Arc::new(PullEngine::new(config).context("building registry client")?);
    let manager = Arc::new(DownloadManager::new(engine, output_dir));
    manager.recover_sessions().await;
    manager.ensure_runner();

    let router = modelpull_axum::create_router(Arc::clone(&manager));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "control plane listening");
    println!("listening on http://{addr}");

    axum::serve(listener, router).await.context("serving HTTP")
}
